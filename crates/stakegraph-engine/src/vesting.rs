//! Time-vested withdrawals.
//!
//! A withdrawal burns shares immediately but pays out over
//! `payout_steps` steps of `payout_step_secs` each. Every mutating engine
//! call services the touched account's pending payouts first, so releases
//! need no background driver; `service_payouts` exists for callers that
//! want to force maturation on an otherwise idle account.

use tracing::info;

use stakegraph_core::error::StakeError;
use stakegraph_core::math::{prop, prop_ceil};
use stakegraph_core::record::{Payout, PayoutKind};
use stakegraph_core::types::{AccountId, AssetId, Balance, Timestamp};

use crate::engine::{Release, StakeEngine};
use crate::traversal::refresh_proxied;
use crate::tx::LedgerTx;

impl StakeEngine {
    /// Burn own shares worth exactly `amount` of unproxied balance and
    /// enqueue a vesting payout for it. Funds routed onward must be recalled
    /// before they can be withdrawn.
    pub fn withdraw(
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
        service_payouts_tx(&mut tx, account, now)?;
        refresh_proxied(&mut tx, account)?;

        let (balance, total, shares_sum, own_share, floor) = {
            let a = tx.agent(account)?;
            (a.balance, a.total_funds(), a.shares_sum, a.own_share, a.min_own_staked)
        };
        if amount > balance {
            return Err(StakeError::InsufficientFunds { need: amount, have: balance });
        }
        // Ceiling burn: the rate never drops below what remaining holders had.
        let burn = prop_ceil(amount, shares_sum, total);
        if burn > own_share {
            return Err(StakeError::InsufficientFunds { need: burn, have: own_share });
        }
        // Burning the last share must take the last unit of value with it,
        // otherwise the residue would be owned by nobody.
        if burn == shares_sum && total != amount {
            return Err(StakeError::InsufficientFunds { need: total, have: amount });
        }
        let has_grants = !tx.grants_of(account)?.is_empty();
        if has_grants && balance - amount < floor {
            return Err(StakeError::InsufficientFunds { need: floor + amount, have: balance });
        }

        let a = tx.agent_mut(account)?;
        a.set_balance(a.balance - amount);
        a.shares_sum -= burn;
        a.own_share -= burn;

        let id = tx.new_payout_id()?;
        let steps = tx.params().payout_steps;
        tx.put_payout(Payout {
            id,
            asset,
            account: *account,
            kind: PayoutKind::Withdrawal,
            balance: amount,
            steps_left: steps,
            last_step_at: now,
        });

        let releases = self.finish(tx)?;
        info!(%asset, %account, amount, burn, "withdraw enqueued");
        Ok(releases)
    }

    /// Mature any due payout steps for `account` and act on the releases.
    pub fn service_payouts(
        &self,
        asset: AssetId,
        account: &AccountId,
        now: Timestamp,
    ) -> Result<Vec<Release>, StakeError> {
        let mut tx = self.begin(asset)?;
        service_payouts_tx(&mut tx, account, now)?;
        self.finish(tx)
    }

    /// Pull `amount` back out of pending withdrawal payouts (oldest first)
    /// and re-stake it at the current exchange rate.
    pub fn cancel_withdraw(
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
        service_payouts_tx(&mut tx, account, now)?;

        let mut remaining = amount;
        for mut p in tx.payouts_of(account)? {
            if p.kind != PayoutKind::Withdrawal || remaining == 0 {
                continue;
            }
            let take = p.balance.min(remaining);
            remaining -= take;
            p.balance -= take;
            if p.balance == 0 {
                tx.delete_payout(account, p.id);
            } else {
                tx.put_payout(p);
            }
        }
        if remaining > 0 {
            return Err(StakeError::InsufficientFunds { need: amount, have: amount - remaining });
        }

        refresh_proxied(&mut tx, account)?;
        let a = tx.agent_mut(account)?;
        let minted = if a.shares_sum == 0 {
            amount
        } else {
            prop(amount, a.shares_sum, a.total_funds())
        };
        a.set_balance(a.balance + amount);
        a.shares_sum += minted;
        a.own_share += minted;

        let releases = self.finish(tx)?;
        info!(%asset, %account, amount, minted, "withdrawal canceled");
        Ok(releases)
    }
}

/// Mature due steps on every pending payout of `account` inside an open
/// transaction. Each elapsed step releases `balance / steps_left` of the
/// remaining balance; the final step flushes whatever is left, so the sum of
/// releases equals the enqueued amount exactly.
pub(crate) fn service_payouts_tx(
    tx: &mut LedgerTx<'_>,
    account: &AccountId,
    now: Timestamp,
) -> Result<(), StakeError> {
    let step_secs = tx.params().payout_step_secs;
    for mut p in tx.payouts_of(account)? {
        let elapsed = (now - p.last_step_at) / step_secs;
        if elapsed <= 0 {
            continue;
        }
        let released = if elapsed as u64 >= p.steps_left as u64 {
            p.balance
        } else {
            prop(p.balance, elapsed as Balance, p.steps_left as Balance)
        };
        if elapsed as u64 >= p.steps_left as u64 {
            tx.delete_payout(account, p.id);
        } else {
            p.balance -= released;
            p.steps_left -= elapsed as u32;
            p.last_step_at += elapsed * step_secs;
            tx.put_payout(p.clone());
        }
        if released == 0 {
            continue;
        }
        if p.kind == PayoutKind::ProvisionReturn {
            // Lent capacity matures back; no tokens move.
            let a = tx.agent_mut(account)?;
            a.provided = a.provided.saturating_sub(released);
        }
        tx.push_release(Release {
            asset: tx.asset(),
            account: *account,
            kind: p.kind,
            amount: released,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{base_params, engine, engine_with_ledger, RecordingLedger};
    use std::sync::Arc;
    use stakegraph_core::types::AssetId;

    const ASSET: AssetId = AssetId(3);

    #[test]
    fn withdrawal_vests_in_equal_steps_with_exact_flush() {
        let e = engine("vest_steps");
        e.create_params(&base_params(ASSET)).unwrap(); // 4 steps of 100s
        let a = AccountId::named("a");
        e.deposit(ASSET, &a, 100, 0).unwrap();
        e.withdraw(ASSET, &a, 100, 0).unwrap();

        let agent = e.db.get_agent(ASSET, &a).unwrap().unwrap();
        assert_eq!((agent.balance, agent.shares_sum, agent.own_share), (0, 0, 0));

        let mut total = 0;
        for (t, expect) in [(100, 25), (200, 25), (300, 25), (400, 25)] {
            let rel = e.service_payouts(ASSET, &a, t).unwrap();
            assert_eq!(rel.len(), 1);
            assert_eq!(rel[0].amount, expect);
            total += rel[0].amount;
        }
        assert_eq!(total, 100);
        assert!(e.db.payouts_of(ASSET, &a).unwrap().is_empty());
    }

    #[test]
    fn servicing_twice_at_the_same_instant_releases_once() {
        let e = engine("vest_idem");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        e.deposit(ASSET, &a, 80, 0).unwrap();
        e.withdraw(ASSET, &a, 80, 0).unwrap();

        assert_eq!(e.service_payouts(ASSET, &a, 150).unwrap()[0].amount, 20);
        assert!(e.service_payouts(ASSET, &a, 150).unwrap().is_empty());
        // Two more elapsed steps release two more slices at once.
        assert_eq!(e.service_payouts(ASSET, &a, 350).unwrap()[0].amount, 40);
    }

    #[test]
    fn late_servicing_past_the_last_step_flushes_everything() {
        let e = engine("vest_late");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        e.deposit(ASSET, &a, 7, 0).unwrap();
        e.withdraw(ASSET, &a, 7, 0).unwrap();
        let rel = e.service_payouts(ASSET, &a, 10_000).unwrap();
        assert_eq!(rel.len(), 1);
        assert_eq!(rel[0].amount, 7);
    }

    #[test]
    fn withdraw_is_limited_to_unproxied_balance() {
        let e = engine("vest_proxied");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        e.deposit(ASSET, &a, 100, 0).unwrap();
        e.create_agent(ASSET, &b).unwrap();
        e.set_proxy_level(ASSET, &b, 1).unwrap();
        e.delegate(ASSET, &a, &b, 60, 0).unwrap();

        assert!(matches!(
            e.withdraw(ASSET, &a, 41, 0),
            Err(StakeError::InsufficientFunds { need: 41, have: 40 })
        ));
    }

    #[test]
    fn self_stake_floor_blocks_withdraw_while_grants_exist() {
        let e = engine("vest_floor");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        let b = AccountId::named("b");
        e.deposit(ASSET, &a, 100, 0).unwrap();
        e.create_agent(ASSET, &b).unwrap();
        e.set_proxy_level(ASSET, &b, 1).unwrap();
        e.delegate(ASSET, &a, &b, 50, 0).unwrap();
        e.set_agent_terms(ASSET, &a, 0, 30).unwrap();

        assert!(e.withdraw(ASSET, &a, 21, 0).is_err());
        e.withdraw(ASSET, &a, 20, 0).unwrap();
    }

    #[test]
    fn cancel_withdraw_restores_stake_at_current_rate() {
        let e = engine("vest_cancel");
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        e.deposit(ASSET, &a, 100, 0).unwrap();
        e.withdraw(ASSET, &a, 40, 0).unwrap();

        // One step matures before the cancel; only the rest is recoverable.
        e.service_payouts(ASSET, &a, 100).unwrap();
        assert!(matches!(
            e.cancel_withdraw(ASSET, &a, 31, 100),
            Err(StakeError::InsufficientFunds { need: 31, have: 30 })
        ));
        e.cancel_withdraw(ASSET, &a, 30, 100).unwrap();

        let agent = e.db.get_agent(ASSET, &a).unwrap().unwrap();
        assert_eq!(agent.balance, 90);
        assert_eq!(agent.shares_sum, agent.own_share);
        assert_eq!(agent.own_value(), 90);
        assert!(e.db.payouts_of(ASSET, &a).unwrap().is_empty());
    }

    #[test]
    fn matured_withdrawals_reach_the_token_ledger() {
        let ledger = Arc::new(RecordingLedger::default());
        let e = engine_with_ledger("vest_ledger", ledger.clone());
        e.create_params(&base_params(ASSET)).unwrap();
        let a = AccountId::named("a");
        e.deposit(ASSET, &a, 40, 0).unwrap();
        e.withdraw(ASSET, &a, 40, 0).unwrap();
        e.service_payouts(ASSET, &a, 200).unwrap();

        let out = ledger.transfers();
        assert_eq!(out, vec![(a, 20)]);
    }
}
