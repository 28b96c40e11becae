use serde::{Deserialize, Serialize};

use crate::math::prop;
use crate::types::{AccountId, AssetId, Balance, Bps, SigningKey, Timestamp};

// ── Agent ─────────────────────────────────────────────────────────────────────

/// One staking agent per (asset, account).
///
/// An agent's total funds are `balance + proxied`; `shares_sum` proportional
/// shares are issued against them. `own_share` is the sub-portion of those
/// shares redeemable by the account itself, the rest belong to upstream
/// grantors. The exchange rate `total_funds / shares_sum` only rises absent
/// withdrawals: rewards add funds without minting shares.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub asset: AssetId,
    pub account: AccountId,
    /// 0 = ultimate voter; >0 = proxy. Strictly decreases along every grant
    /// edge, which makes the grant graph a DAG by construction.
    pub proxy_level: u8,
    /// Unproxied funds directly controlled by the account.
    pub balance: Balance,
    /// Value this agent has routed onward through its outgoing grants.
    /// A cached figure; refreshed from child exchange rates before the
    /// traversals that depend on it.
    pub proxied: Balance,
    /// Total shares issued against `balance + proxied`.
    pub shares_sum: Balance,
    /// Shares owned by the account itself.
    pub own_share: Balance,
    /// Basis points skimmed from incoming rewards before distribution.
    pub fee_bps: Bps,
    /// Floor below which `balance` may not fall while outgoing grants exist.
    pub min_own_staked: Balance,
    /// Resource capacity lent to other accounts (outstanding).
    pub provided: Balance,
    /// Resource capacity received from other accounts and not yet consumed.
    pub received: Balance,
    pub signing_key: Option<SigningKey>,
    /// `Some(balance)` iff `proxy_level == 0`; `None` marks the agent as not
    /// directly electable.
    pub votes: Option<Balance>,
}

impl Agent {
    pub fn new(asset: AssetId, account: AccountId, proxy_level: u8) -> Self {
        Self {
            asset,
            account,
            proxy_level,
            balance: 0,
            proxied: 0,
            shares_sum: 0,
            own_share: 0,
            fee_bps: 0,
            min_own_staked: 0,
            provided: 0,
            received: 0,
            signing_key: None,
            votes: if proxy_level == 0 { Some(0) } else { None },
        }
    }

    pub fn total_funds(&self) -> Balance {
        self.balance + self.proxied
    }

    /// Set `balance`, recomputing `votes` (only level-0 agents vote directly).
    pub fn set_balance(&mut self, balance: Balance) {
        self.balance = balance;
        self.votes = if self.proxy_level == 0 { Some(balance) } else { None };
    }

    /// Set `proxy_level`, recomputing `votes`.
    pub fn set_proxy_level(&mut self, level: u8) {
        self.proxy_level = level;
        self.votes = if level == 0 { Some(self.balance) } else { None };
    }

    /// Current value of the account's own shares.
    pub fn own_value(&self) -> Balance {
        prop(self.total_funds(), self.own_share, self.shares_sum)
    }
}

// ── Grant ─────────────────────────────────────────────────────────────────────

/// Directed delegation edge (grantor → agent), scoped per asset.
///
/// Deleted when `share == 0 && pct_bps == 0`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Grant {
    pub asset: AssetId,
    pub grantor: AccountId,
    pub agent: AccountId,
    /// Basis points of the grantor's NEW inbound stake auto-routed onto this
    /// edge. Only drives fan-out; already-delegated capital is tracked in
    /// `share`.
    pub pct_bps: Bps,
    /// Agent-currency shares currently held by the grantor through this edge.
    /// This, not `pct_bps`, is what recall redeems.
    pub share: Balance,
    /// Cumulative nominal amount ever routed through this edge. Bookkeeping
    /// only; never reduced.
    pub granted: Balance,
    /// Highest agent fee the grantor tolerates before the grant is
    /// force-broken.
    pub break_fee_bps: Bps,
    /// Lowest agent self-stake floor the grantor tolerates.
    pub break_min_own_staked: Balance,
}

impl Grant {
    pub fn new(asset: AssetId, grantor: AccountId, agent: AccountId) -> Self {
        Self {
            asset,
            grantor,
            agent,
            pct_bps: 0,
            share: 0,
            granted: 0,
            break_fee_bps: crate::types::BPS_DENOM as Bps,
            break_min_own_staked: 0,
        }
    }

    /// True once the edge carries neither capital nor an auto-route.
    pub fn is_empty(&self) -> bool {
        self.share == 0 && self.pct_bps == 0
    }
}

// ── Payout ────────────────────────────────────────────────────────────────────

/// What a matured payout release does.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PayoutKind {
    /// Release transfers tokens out via the external ledger.
    Withdrawal,
    /// Release restores the grantor's resource-lending capacity; no tokens
    /// move (provisioning never touched balances).
    ProvisionReturn,
}

/// One pending time-vested release. Each elapsed step releases
/// `balance / steps_left`, recomputed against the remaining balance so the
/// rounding remainder concentrates at the final step, which flushes exactly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Payout {
    pub id: u64,
    pub asset: AssetId,
    pub account: AccountId,
    pub kind: PayoutKind,
    pub balance: Balance,
    pub steps_left: u32,
    pub last_step_at: Timestamp,
}

// ── ProvisionEdge ─────────────────────────────────────────────────────────────

/// Resource-bandwidth lending edge (grantor → recipient), independent of
/// voting shares. Invariant: `received <= provided` (consumption only burns
/// `received`; recall reduces both).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProvisionEdge {
    pub asset: AssetId,
    pub grantor: AccountId,
    pub recipient: AccountId,
    /// Capacity still lent through this edge.
    pub provided: Balance,
    /// Lent capacity the recipient has not yet consumed.
    pub received: Balance,
}

impl ProvisionEdge {
    pub fn new(asset: AssetId, grantor: AccountId, recipient: AccountId) -> Self {
        Self { asset, grantor, recipient, provided: 0, received: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn votes_track_level_and_balance() {
        let mut a = Agent::new(AssetId(1), AccountId::named("v"), 0);
        assert_eq!(a.votes, Some(0));
        a.set_balance(70);
        assert_eq!(a.votes, Some(70));
        a.set_proxy_level(2);
        assert_eq!(a.votes, None);
        a.set_balance(90);
        assert_eq!(a.votes, None);
        a.set_proxy_level(0);
        assert_eq!(a.votes, Some(90));
    }

    #[test]
    fn own_value_is_proportional() {
        let mut a = Agent::new(AssetId(1), AccountId::named("p"), 1);
        a.balance = 60;
        a.proxied = 40;
        a.shares_sum = 100;
        a.own_share = 25;
        assert_eq!(a.own_value(), 25);
        assert_eq!(a.total_funds(), 100);
    }

    #[test]
    fn fresh_grant_is_not_empty_free_pass() {
        let g = Grant::new(AssetId(1), AccountId::named("a"), AccountId::named("b"));
        assert!(g.is_empty());
        let mut g2 = g.clone();
        g2.pct_bps = 5_000;
        assert!(!g2.is_empty());
    }
}
