//! Core stake operations: parameter admin, deposit, delegate, recall, reward.

use std::sync::Arc;

use tracing::info;

use stakegraph_core::error::StakeError;
use stakegraph_core::math::prop;
use stakegraph_core::params::LedgerParams;
use stakegraph_core::record::{Grant, PayoutKind};
use stakegraph_core::types::{AccountId, AssetId, Balance, Bps, Timestamp, BPS_DENOM};
use stakegraph_store::StakeDb;

use crate::traversal::{reclaim, refresh_proxied, spread};
use crate::tx::LedgerTx;
use crate::vesting;

// ── External token ledger ────────────────────────────────────────────────────

/// Callback into the token ledger that custody-holds staked funds. Invoked
/// after commit for every matured withdrawal release.
pub trait TokenLedger: Send + Sync {
    fn transfer_out(
        &self,
        asset: AssetId,
        account: &AccountId,
        amount: Balance,
    ) -> Result<(), StakeError>;
}

/// No-op ledger for deployments where token movement is settled elsewhere.
pub struct NullLedger;

impl TokenLedger for NullLedger {
    fn transfer_out(
        &self,
        _asset: AssetId,
        _account: &AccountId,
        _amount: Balance,
    ) -> Result<(), StakeError> {
        Ok(())
    }
}

/// One matured release produced by payout servicing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Release {
    pub asset: AssetId,
    pub account: AccountId,
    pub kind: PayoutKind,
    pub amount: Balance,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Inflow guard: the pool a traversal enters must absorb the whole amount
/// within `Balance` range. Child pools hold subsets of the root pool, so
/// one root check bounds every addition the traversal performs below it.
fn check_capacity(total: Balance, amount: Balance) -> Result<(), StakeError> {
    if total.checked_add(amount).is_none() {
        return Err(StakeError::BadParams(format!(
            "amount {amount} overflows pool capacity ({total} held)"
        )));
    }
    Ok(())
}

/// The staking ledger. All mutations go through one staged transaction per
/// call; a call either commits fully or leaves the store untouched.
pub struct StakeEngine {
    pub db: Arc<StakeDb>,
    ledger: Arc<dyn TokenLedger>,
}

impl StakeEngine {
    pub fn new(db: Arc<StakeDb>, ledger: Arc<dyn TokenLedger>) -> Self {
        Self { db, ledger }
    }

    pub(crate) fn begin(&self, asset: AssetId) -> Result<LedgerTx<'_>, StakeError> {
        LedgerTx::begin(&self.db, asset)
    }

    /// Commit the transaction, then act on the matured releases. Withdrawal
    /// releases call out to the token ledger; a transfer failure after
    /// commit is surfaced to the caller but the committed state stands.
    pub(crate) fn finish(&self, tx: LedgerTx<'_>) -> Result<Vec<Release>, StakeError> {
        let releases = tx.commit()?;
        for r in &releases {
            if r.kind == PayoutKind::Withdrawal {
                self.ledger.transfer_out(r.asset, &r.account, r.amount)?;
            }
        }
        Ok(releases)
    }

    // ── Parameters ───────────────────────────────────────────────────────────

    pub fn create_params(&self, params: &LedgerParams) -> Result<(), StakeError> {
        params.validate()?;
        if self.db.get_params(params.asset)?.is_some() {
            return Err(StakeError::AlreadyExists(format!("ledger params for {}", params.asset)));
        }
        self.db.put_params(params)?;
        info!(asset = %params.asset, levels = params.max_level(), "ledger created");
        Ok(())
    }

    pub fn update_params(&self, params: &LedgerParams) -> Result<(), StakeError> {
        params.validate()?;
        if self.db.get_params(params.asset)?.is_none() {
            return Err(StakeError::NotFound(format!("ledger params for {}", params.asset)));
        }
        self.db.put_params(params)?;
        info!(asset = %params.asset, "ledger params updated");
        Ok(())
    }

    // ── Deposit ──────────────────────────────────────────────────────────────

    /// Stake `amount` onto the caller's own agent, creating the agent on
    /// first contact. New stake auto-routes down the agent's `pct_bps`
    /// edges; shares minted at the root belong to the account itself.
    pub fn deposit(
        &self,
        asset: AssetId,
        account: &AccountId,
        amount: Balance,
        now: Timestamp,
    ) -> Result<Vec<Release>, StakeError> {
        if amount == 0 {
            return Ok(Vec::new());
        }
        let mut tx = self.begin(asset)?;
        tx.open_agent(account)?;
        vesting::service_payouts_tx(&mut tx, account, now)?;
        refresh_proxied(&mut tx, account)?;
        check_capacity(tx.agent(account)?.total_funds(), amount)?;
        let minted = spread(&mut tx, account, amount, true)?;
        tx.agent_mut(account)?.own_share += minted;
        let releases = self.finish(tx)?;
        info!(%asset, %account, amount, minted, "deposit");
        Ok(releases)
    }

    // ── Delegate ─────────────────────────────────────────────────────────────

    /// Move `amount` of the grantor's unproxied balance into `agent`,
    /// receiving agent shares on the grant edge. The grantor's proxy level
    /// must strictly exceed the agent's.
    pub fn delegate(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        agent: &AccountId,
        amount: Balance,
        now: Timestamp,
    ) -> Result<Vec<Release>, StakeError> {
        if amount == 0 {
            return Ok(Vec::new());
        }
        let mut tx = self.begin(asset)?;
        vesting::service_payouts_tx(&mut tx, grantor, now)?;

        let (grantor_level, grantor_balance, grantor_floor) = {
            let g = tx.agent(grantor)?;
            (g.proxy_level, g.balance, g.min_own_staked)
        };
        let agent_level = tx.agent(agent)?.proxy_level;
        if grantor_level <= agent_level {
            return Err(StakeError::LevelViolation { grantor_level, agent_level });
        }
        if amount > grantor_balance {
            return Err(StakeError::InsufficientFunds { need: amount, have: grantor_balance });
        }
        if grantor_balance - amount < grantor_floor {
            return Err(StakeError::InsufficientFunds {
                need: grantor_floor + amount,
                have: grantor_balance,
            });
        }

        let existing = tx.grant(grantor, agent)?;
        if existing.is_none() {
            let cap = tx.params().fanout_cap(grantor_level);
            let count = tx.grants_of(grantor)?.len();
            if count >= cap as usize {
                return Err(StakeError::FanoutExceeded { level: grantor_level, max: cap });
            }
        }

        refresh_proxied(&mut tx, agent)?;
        check_capacity(tx.agent(agent)?.total_funds(), amount)?;
        let minted = spread(&mut tx, agent, amount, true)?;

        let g = tx.agent_mut(grantor)?;
        g.set_balance(g.balance - amount);
        g.proxied += amount;

        let mut edge = existing.unwrap_or_else(|| Grant::new(asset, *grantor, *agent));
        edge.share += minted;
        edge.granted = edge.granted.saturating_add(amount);
        tx.put_grant(edge);

        let releases = self.finish(tx)?;
        info!(%asset, %grantor, %agent, amount, minted, "delegate");
        Ok(releases)
    }

    // ── Recall ───────────────────────────────────────────────────────────────

    /// Redeem `pct_bps` of the grantor's shares on the `grantor -> agent`
    /// edge at the current exchange rate, pulling the value back into the
    /// grantor's unproxied balance. Recursive: the agent covers the
    /// redemption from its own balance and by recalling from its own grants
    /// proportionally.
    pub fn recall(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        agent: &AccountId,
        pct_bps: Bps,
        now: Timestamp,
    ) -> Result<Vec<Release>, StakeError> {
        if pct_bps == 0 {
            return Ok(Vec::new());
        }
        if pct_bps as u64 > BPS_DENOM {
            return Err(StakeError::BadBps(pct_bps));
        }
        let mut tx = self.begin(asset)?;
        vesting::service_payouts_tx(&mut tx, grantor, now)?;

        let mut edge = tx
            .grant(grantor, agent)?
            .ok_or_else(|| StakeError::NotFound(format!("grant {grantor} -> {agent}")))?;
        refresh_proxied(&mut tx, agent)?;

        let redeemed = prop(edge.share, pct_bps as Balance, BPS_DENOM);
        if redeemed == 0 {
            return Ok(Vec::new());
        }
        let amount = reclaim(&mut tx, agent, redeemed)?;

        edge.share -= redeemed;
        if edge.is_empty() {
            tx.delete_grant(grantor, agent);
        } else {
            tx.put_grant(edge);
        }

        let g = tx.agent_mut(grantor)?;
        g.proxied = g.proxied.saturating_sub(amount);
        g.set_balance(g.balance + amount);

        let releases = self.finish(tx)?;
        info!(%asset, %grantor, %agent, pct_bps, redeemed, amount, "recall");
        Ok(releases)
    }

    // ── Reward ───────────────────────────────────────────────────────────────

    /// Credit a reward to `agent`. The agent's fee is skimmed first and
    /// accrues to the account's own shares; the remainder refills the pool
    /// without minting at the root, raising the exchange rate for every
    /// current share holder, and auto-routes down `pct_bps` edges like any
    /// other inflow.
    pub fn reward(
        &self,
        asset: AssetId,
        agent: &AccountId,
        amount: Balance,
        now: Timestamp,
    ) -> Result<Vec<Release>, StakeError> {
        if amount == 0 {
            return Ok(Vec::new());
        }
        let mut tx = self.begin(asset)?;
        vesting::service_payouts_tx(&mut tx, agent, now)?;
        refresh_proxied(&mut tx, agent)?;
        check_capacity(tx.agent(agent)?.total_funds(), amount)?;

        let (shares_sum, fee_bps) = {
            let a = tx.agent(agent)?;
            (a.shares_sum, a.fee_bps)
        };
        if shares_sum == 0 {
            // No share holders to enrich; the whole reward becomes the
            // owner's stake at 1:1.
            let a = tx.agent_mut(agent)?;
            a.set_balance(a.balance + amount);
            a.shares_sum += amount;
            a.own_share += amount;
            let releases = self.finish(tx)?;
            info!(%asset, %agent, amount, "reward (empty agent)");
            return Ok(releases);
        }

        let fee = prop(amount, fee_bps as Balance, BPS_DENOM);
        let payout = amount - fee;
        spread(&mut tx, agent, payout, false)?;

        if fee > 0 {
            // Fee value mints owner shares at the post-distribution rate so
            // that holders keep the full reward they just received.
            let a = tx.agent_mut(agent)?;
            let fee_shares = prop(fee, a.shares_sum, a.total_funds());
            a.set_balance(a.balance + fee);
            a.shares_sum += fee_shares;
            a.own_share += fee_shares;
        }

        let releases = self.finish(tx)?;
        info!(%asset, %agent, amount, fee, "reward");
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{base_params, engine};
    use stakegraph_core::types::AccountId;

    const ASSET: AssetId = AssetId(1);

    #[test]
    fn deposit_mints_one_to_one_on_fresh_agent() {
        let e = engine("deposit_fresh");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");

        e.deposit(ASSET, &a, 100, 0).unwrap();
        let agent = e.db.get_agent(ASSET, &a).unwrap().unwrap();
        assert_eq!(agent.balance, 100);
        assert_eq!(agent.shares_sum, 100);
        assert_eq!(agent.own_share, 100);
        assert_eq!(agent.proxied, 0);
        // Fresh agents start at the maximum proxy level, so no direct votes.
        assert_eq!(agent.proxy_level, 3);
        assert_eq!(agent.votes, None);
    }

    #[test]
    fn zero_amounts_are_no_ops() {
        let e = engine("zero_noop");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        assert!(e.deposit(ASSET, &a, 0, 0).unwrap().is_empty());
        assert!(e.db.get_agent(ASSET, &a).unwrap().is_none());
        assert!(e.reward(ASSET, &a, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn inflows_past_pool_capacity_are_rejected() {
        let e = engine("capacity");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        e.deposit(ASSET, &a, Balance::MAX, 0).unwrap();

        assert!(matches!(e.deposit(ASSET, &a, 1, 0), Err(StakeError::BadParams(_))));
        assert!(matches!(e.reward(ASSET, &a, 1, 0), Err(StakeError::BadParams(_))));
        e.create_agent(ASSET, &b).unwrap();
        e.set_proxy_level(ASSET, &b, 1).unwrap();
        e.deposit(ASSET, &b, Balance::MAX, 0).unwrap();
        assert!(matches!(e.delegate(ASSET, &a, &b, 1, 0), Err(StakeError::BadParams(_))));

        let agent = e.db.get_agent(ASSET, &a).unwrap().unwrap();
        assert_eq!(agent.balance, Balance::MAX);
        assert_eq!(agent.shares_sum, Balance::MAX);
    }

    #[test]
    fn params_admin_is_strict() {
        let e = engine("params_admin");
        let p = base_params(ASSET);
        assert!(matches!(e.update_params(&p), Err(StakeError::NotFound(_))));
        e.create_params(&p).unwrap();
        assert!(matches!(e.create_params(&p), Err(StakeError::AlreadyExists(_))));
        e.update_params(&p).unwrap();
    }

    #[test]
    fn delegate_requires_strict_level_descent() {
        let e = engine("level_descent");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        e.deposit(ASSET, &a, 100, 0).unwrap();
        e.create_agent(ASSET, &b).unwrap();

        // Both sit at the maximum level by default.
        let err = e.delegate(ASSET, &a, &b, 50, 0).unwrap_err();
        assert!(matches!(err, StakeError::LevelViolation { grantor_level: 3, agent_level: 3 }));

        e.set_proxy_level(ASSET, &b, 1).unwrap();
        e.delegate(ASSET, &a, &b, 50, 0).unwrap();
        let ga = e.db.get_agent(ASSET, &a).unwrap().unwrap();
        assert_eq!((ga.balance, ga.proxied), (50, 50));
    }

    #[test]
    fn delegate_rejects_overdraw() {
        let e = engine("overdraw");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        e.deposit(ASSET, &a, 30, 0).unwrap();
        e.create_agent(ASSET, &b).unwrap();
        e.set_proxy_level(ASSET, &b, 1).unwrap();

        let err = e.delegate(ASSET, &a, &b, 31, 0).unwrap_err();
        assert!(matches!(err, StakeError::InsufficientFunds { need: 31, have: 30 }));
    }

    #[test]
    fn fanout_cap_binds_new_edges_only() {
        let e = engine("fanout_cap");
        let mut p = base_params(ASSET);
        p.max_fanout = vec![4, 4, 1];
        e.create_params(&p).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        let c = AccountId::named("c");
        e.deposit(ASSET, &a, 100, 0).unwrap();
        for target in [&b, &c] {
            e.create_agent(ASSET, target).unwrap();
            e.set_proxy_level(ASSET, target, 1).unwrap();
        }

        e.delegate(ASSET, &a, &b, 10, 0).unwrap();
        // Growing the existing edge stays allowed.
        e.delegate(ASSET, &a, &b, 10, 0).unwrap();
        let err = e.delegate(ASSET, &a, &c, 10, 0).unwrap_err();
        assert!(matches!(err, StakeError::FanoutExceeded { level: 3, max: 1 }));
    }

    #[test]
    fn param_shrink_strands_high_levels_without_panicking() {
        let e = engine("param_shrink");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        e.deposit(ASSET, &a, 100, 0).unwrap(); // level 3
        e.create_agent(ASSET, &b).unwrap();
        e.set_proxy_level(ASSET, &b, 1).unwrap();

        let mut p = base_params(ASSET);
        p.max_fanout = vec![8];
        e.update_params(&p).unwrap();

        // A now sits beyond the configured depth; new edges are capped at 0
        // instead of indexing out of bounds.
        let err = e.delegate(ASSET, &a, &b, 10, 0).unwrap_err();
        assert!(matches!(err, StakeError::FanoutExceeded { level: 3, max: 0 }));
    }

    #[test]
    fn recall_of_unknown_grant_is_not_found() {
        let e = engine("recall_unknown");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        e.deposit(ASSET, &a, 10, 0).unwrap();
        assert!(matches!(
            e.recall(ASSET, &a, &b, BPS_DENOM as Bps, 0),
            Err(StakeError::NotFound(_))
        ));
    }

    #[test]
    fn reward_raises_rate_without_minting() {
        let e = engine("reward_rate");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        e.deposit(ASSET, &a, 100, 0).unwrap();
        e.reward(ASSET, &a, 10, 0).unwrap();

        let agent = e.db.get_agent(ASSET, &a).unwrap().unwrap();
        assert_eq!(agent.balance, 110);
        assert_eq!(agent.shares_sum, 100);
        assert_eq!(agent.own_value(), 110);
    }

    #[test]
    fn reward_on_empty_agent_credits_owner() {
        let e = engine("reward_empty");
        e.create_params(&base_params(ASSET)).unwrap();
        let b = AccountId::named("b");
        e.create_agent(ASSET, &b).unwrap();
        e.reward(ASSET, &b, 25, 0).unwrap();

        let agent = e.db.get_agent(ASSET, &b).unwrap().unwrap();
        assert_eq!((agent.balance, agent.shares_sum, agent.own_share), (25, 25, 25));
    }

    /// Full pipeline: deposit, delegate through an auto-routing proxy with a
    /// fee, reward, and recall everything back out with exact conservation.
    #[test]
    fn fee_and_auto_route_pipeline_conserves_value() {
        let e = engine("pipeline");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        let c = AccountId::named("c");

        e.create_agent(ASSET, &c).unwrap();
        e.set_proxy_level(ASSET, &c, 0).unwrap();
        e.create_agent(ASSET, &b).unwrap();
        e.set_proxy_level(ASSET, &b, 1).unwrap();
        e.set_agent_terms(ASSET, &b, 1_000, 0).unwrap();
        e.set_grant_terms(ASSET, &b, &c, 5_000, BPS_DENOM as Bps, 0).unwrap();

        e.deposit(ASSET, &a, 100, 0).unwrap();
        e.delegate(ASSET, &a, &b, 100, 0).unwrap();

        let gb = e.db.get_agent(ASSET, &b).unwrap().unwrap();
        let gc = e.db.get_agent(ASSET, &c).unwrap().unwrap();
        assert_eq!((gb.balance, gb.proxied, gb.shares_sum), (50, 50, 100));
        assert_eq!((gc.balance, gc.shares_sum), (50, 50));
        // A level-0 target votes with its whole balance.
        assert_eq!(gc.votes, Some(50));

        e.reward(ASSET, &b, 10, 0).unwrap();
        let gb = e.db.get_agent(ASSET, &b).unwrap().unwrap();
        let gc = e.db.get_agent(ASSET, &c).unwrap().unwrap();
        // Fee 1 stays with B; of the 9 distributed, floor(9 * 50%) = 4
        // routes to C and 5 stay in B's pool.
        assert_eq!(gb.balance, 56);
        assert_eq!(gb.shares_sum, 100);
        assert_eq!(gc.balance, 54);

        e.recall(ASSET, &a, &b, BPS_DENOM as Bps, 0).unwrap();
        let ga = e.db.get_agent(ASSET, &a).unwrap().unwrap();
        assert_eq!(ga.balance, 110, "deposit plus full reward comes back");
        assert_eq!(ga.proxied, 0);
        let gb = e.db.get_agent(ASSET, &b).unwrap().unwrap();
        let gc = e.db.get_agent(ASSET, &c).unwrap().unwrap();
        assert_eq!((gb.total_funds(), gb.shares_sum), (0, 0));
        assert_eq!((gc.total_funds(), gc.shares_sum), (0, 0));
        assert!(e.db.get_grant(ASSET, &a, &b).unwrap().is_none());
        // The B -> C edge keeps its auto-route and only drops its capital:
        // edges die at share == 0 && pct_bps == 0.
        let bc = e.db.get_grant(ASSET, &b, &c).unwrap().unwrap();
        assert_eq!(bc.share, 0);
        assert_eq!(bc.pct_bps, 5_000);
    }

    #[test]
    fn partial_recall_leaves_proportional_remainder() {
        let e = engine("partial_recall");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        e.deposit(ASSET, &a, 100, 0).unwrap();
        e.create_agent(ASSET, &b).unwrap();
        e.set_proxy_level(ASSET, &b, 1).unwrap();
        e.delegate(ASSET, &a, &b, 100, 0).unwrap();

        e.recall(ASSET, &a, &b, 2_500, 0).unwrap();
        let ga = e.db.get_agent(ASSET, &a).unwrap().unwrap();
        assert_eq!((ga.balance, ga.proxied), (25, 75));
        let edge = e.db.get_grant(ASSET, &a, &b).unwrap().unwrap();
        assert_eq!(edge.share, 75);
        let gb = e.db.get_agent(ASSET, &b).unwrap().unwrap();
        assert_eq!((gb.balance, gb.shares_sum), (75, 75));
    }
}
