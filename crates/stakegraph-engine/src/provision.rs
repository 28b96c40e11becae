//! Resource-bandwidth lending.
//!
//! Agents can lend resource capacity backed by their unproxied balance to
//! other accounts. Lending never moves tokens and never touches voting
//! shares; it only constrains how much of the lender's balance is spoken
//! for. Consumed capacity cannot be recalled instantly: the consumed part
//! comes back through a vesting payout like a withdrawal would.

use tracing::info;

use stakegraph_core::error::StakeError;
use stakegraph_core::record::{Payout, PayoutKind, ProvisionEdge};
use stakegraph_core::types::{AccountId, AssetId, Balance, Timestamp};

use crate::engine::{Release, StakeEngine};
use crate::vesting::service_payouts_tx;

impl StakeEngine {
    /// Lend `amount` of resource capacity to `recipient`, creating the
    /// recipient's agent on first contact. Total outstanding lending is
    /// capped by the grantor's unproxied balance.
    pub fn provide(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        recipient: &AccountId,
        amount: Balance,
        now: Timestamp,
    ) -> Result<Vec<Release>, StakeError> {
        if amount == 0 {
            return Ok(Vec::new());
        }
        if grantor == recipient {
            return Err(StakeError::BadParams("cannot provide to self".into()));
        }
        let mut tx = self.begin(asset)?;
        // Matured ProvisionReturn payouts free headroom before the cap check.
        service_payouts_tx(&mut tx, grantor, now)?;
        let (balance, provided) = {
            let g = tx.agent(grantor)?;
            (g.balance, g.provided)
        };
        // Checked: a near-max `amount` must not wrap past the cap.
        let need = provided
            .checked_add(amount)
            .ok_or(StakeError::InsufficientFunds { need: Balance::MAX, have: balance })?;
        if need > balance {
            return Err(StakeError::InsufficientFunds { need, have: balance });
        }

        let mut edge = tx
            .provision(grantor, recipient)?
            .unwrap_or_else(|| ProvisionEdge::new(asset, *grantor, *recipient));
        edge.provided += amount;
        edge.received += amount;
        tx.put_provision(edge);

        tx.agent_mut(grantor)?.provided += amount;
        let r = tx.open_agent(recipient)?;
        r.received += amount;

        let releases = self.finish(tx)?;
        info!(%asset, %grantor, %recipient, amount, "provision granted");
        Ok(releases)
    }

    /// Consume `amount` of the recipient's received capacity, burning it off
    /// the incoming edges in provider-key order.
    pub fn use_provision(
        &self,
        asset: AssetId,
        recipient: &AccountId,
        amount: Balance,
    ) -> Result<(), StakeError> {
        if amount == 0 {
            return Ok(());
        }
        let mut tx = self.begin(asset)?;
        let received = tx.agent(recipient)?.received;
        if amount > received {
            return Err(StakeError::InsufficientFunds { need: amount, have: received });
        }

        let mut remaining = amount;
        for grantor in tx.providers_of(recipient)? {
            if remaining == 0 {
                break;
            }
            let mut edge = match tx.provision(&grantor, recipient)? {
                Some(e) => e,
                None => continue,
            };
            let take = edge.received.min(remaining);
            if take == 0 {
                continue;
            }
            edge.received -= take;
            remaining -= take;
            tx.put_provision(edge);
        }
        if remaining > 0 {
            return Err(StakeError::SystemInvariant(format!(
                "recipient {recipient} aggregate received exceeds edge total by {remaining}"
            )));
        }
        let r = tx.agent_mut(recipient)?;
        r.received -= amount;

        tx.commit()?;
        info!(%asset, %recipient, amount, "provision consumed");
        Ok(())
    }

    /// Take back lent capacity. The unconsumed part returns instantly; the
    /// consumed part vests back through a ProvisionReturn payout, during
    /// which it still counts against the grantor's lending cap.
    pub fn recall_provision(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        recipient: &AccountId,
        amount: Balance,
        now: Timestamp,
    ) -> Result<Vec<Release>, StakeError> {
        if amount == 0 {
            return Ok(Vec::new());
        }
        let mut tx = self.begin(asset)?;
        service_payouts_tx(&mut tx, grantor, now)?;

        let mut edge = tx
            .provision(grantor, recipient)?
            .ok_or_else(|| StakeError::NotFound(format!("provision {grantor} -> {recipient}")))?;
        if amount > edge.provided {
            return Err(StakeError::InsufficientFunds { need: amount, have: edge.provided });
        }

        let instant = amount.min(edge.received);
        let deferred = amount - instant;
        edge.provided -= amount;
        edge.received -= instant;
        if edge.provided == 0 {
            tx.delete_provision(grantor, recipient);
        } else {
            tx.put_provision(edge);
        }

        let g = tx.agent_mut(grantor)?;
        g.provided = g.provided.saturating_sub(instant);
        let r = tx.agent_mut(recipient)?;
        r.received = r.received.saturating_sub(instant);

        if deferred > 0 {
            let id = tx.new_payout_id()?;
            let steps = tx.params().payout_steps;
            tx.put_payout(Payout {
                id,
                asset,
                account: *grantor,
                kind: PayoutKind::ProvisionReturn,
                balance: deferred,
                steps_left: steps,
                last_step_at: now,
            });
        }

        let releases = self.finish(tx)?;
        info!(%asset, %grantor, %recipient, amount, instant, deferred, "provision recalled");
        Ok(releases)
    }
}
