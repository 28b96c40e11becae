//! Agent registry: creation, proxy levels, signing keys, and the terms
//! (fee / self-stake floor / break conditions) agents and grantors publish
//! to each other.

use tracing::{info, warn};

use stakegraph_core::error::StakeError;
use stakegraph_core::record::Grant;
use stakegraph_core::types::{AccountId, AssetId, Balance, Bps, SigningKey, BPS_DENOM};

use crate::engine::StakeEngine;
use crate::traversal::{reclaim, refresh_proxied};

impl StakeEngine {
    /// Ensure an agent record exists; idempotent.
    pub fn open_agent(&self, asset: AssetId, account: &AccountId) -> Result<(), StakeError> {
        let mut tx = self.begin(asset)?;
        tx.open_agent(account)?;
        tx.commit()?;
        Ok(())
    }

    /// Create an agent record, failing if one already exists.
    pub fn create_agent(&self, asset: AssetId, account: &AccountId) -> Result<(), StakeError> {
        let mut tx = self.begin(asset)?;
        if tx.has_agent(account)? {
            return Err(StakeError::AlreadyExists(format!("agent {account}")));
        }
        tx.open_agent(account)?;
        tx.commit()?;
        info!(%asset, %account, "agent created");
        Ok(())
    }

    /// Move an agent to a new proxy level.
    ///
    /// Every existing edge must stay strictly descending afterwards, and
    /// the new level's fan-out cap must cover the current outgoing grants.
    pub fn set_proxy_level(
        &self,
        asset: AssetId,
        account: &AccountId,
        level: u8,
    ) -> Result<(), StakeError> {
        let mut tx = self.begin(asset)?;
        if level > tx.params().max_level() {
            return Err(StakeError::BadParams(format!(
                "proxy level {level} exceeds maximum {}",
                tx.params().max_level()
            )));
        }
        let current = tx.open_agent(account)?.proxy_level;
        if current == level {
            return Err(StakeError::TermsUnchanged);
        }

        let outgoing = tx.grants_of(account)?;
        let cap = tx.params().fanout_cap(level);
        if outgoing.len() > cap as usize {
            return Err(StakeError::FanoutExceeded { level, max: cap });
        }
        for g in &outgoing {
            let child_level = tx.agent(&g.agent)?.proxy_level;
            if level <= child_level {
                return Err(StakeError::LevelViolation {
                    grantor_level: level,
                    agent_level: child_level,
                });
            }
        }
        for grantor in tx.grantors_of(account)? {
            let grantor_level = tx.agent(&grantor)?.proxy_level;
            if grantor_level <= level {
                return Err(StakeError::LevelViolation { grantor_level, agent_level: level });
            }
        }

        tx.agent_mut(account)?.set_proxy_level(level);
        tx.commit()?;
        info!(%asset, %account, level, "proxy level set");
        Ok(())
    }

    /// Register (or clear) the agent's block-production signing key.
    pub fn set_signing_key(
        &self,
        asset: AssetId,
        account: &AccountId,
        key: Option<SigningKey>,
    ) -> Result<(), StakeError> {
        let mut tx = self.begin(asset)?;
        tx.open_agent(account)?.signing_key = key;
        tx.commit()?;
        info!(%asset, %account, registered = key.is_some(), "signing key set");
        Ok(())
    }

    /// Publish the agent's fee and self-stake floor.
    ///
    /// Any incoming grant whose break conditions the new terms violate is
    /// force-broken: its shares are redeemed on the spot and the value
    /// returned to the grantor's unproxied balance.
    pub fn set_agent_terms(
        &self,
        asset: AssetId,
        account: &AccountId,
        fee_bps: Bps,
        min_own_staked: Balance,
    ) -> Result<(), StakeError> {
        if fee_bps as u64 > BPS_DENOM {
            return Err(StakeError::BadBps(fee_bps));
        }
        let mut tx = self.begin(asset)?;
        {
            let a = tx.open_agent(account)?;
            if a.fee_bps == fee_bps && a.min_own_staked == min_own_staked {
                return Err(StakeError::TermsUnchanged);
            }
            a.fee_bps = fee_bps;
            a.min_own_staked = min_own_staked;
        }

        let grantors = tx.grantors_of(account)?;
        let mut broke = false;
        for grantor in grantors {
            let edge = match tx.grant(&grantor, account)? {
                Some(e) => e,
                None => continue,
            };
            if fee_bps <= edge.break_fee_bps && min_own_staked >= edge.break_min_own_staked {
                continue;
            }
            if !broke {
                refresh_proxied(&mut tx, account)?;
                broke = true;
            }
            let amount = reclaim(&mut tx, account, edge.share)?;
            tx.delete_grant(&grantor, account);
            let g = tx.agent_mut(&grantor)?;
            g.proxied = g.proxied.saturating_sub(amount);
            g.set_balance(g.balance + amount);
            warn!(%asset, %grantor, agent = %account, amount, "grant force-broken by terms change");
        }

        tx.commit()?;
        info!(%asset, %account, fee_bps, min_own_staked, "agent terms set");
        Ok(())
    }

    /// Publish a grantor's terms for one edge: the auto-route percentage for
    /// new inbound stake and the break conditions protecting the grantor
    /// against the agent's future terms changes.
    pub fn set_grant_terms(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        agent: &AccountId,
        pct_bps: Bps,
        break_fee_bps: Bps,
        break_min_own_staked: Balance,
    ) -> Result<(), StakeError> {
        if pct_bps as u64 > BPS_DENOM {
            return Err(StakeError::BadBps(pct_bps));
        }
        if break_fee_bps as u64 > BPS_DENOM {
            return Err(StakeError::BadBps(break_fee_bps));
        }
        let mut tx = self.begin(asset)?;
        let grantor_level = tx.open_agent(grantor)?.proxy_level;
        let target = tx.agent(agent)?;
        let (agent_level, agent_fee, agent_floor) =
            (target.proxy_level, target.fee_bps, target.min_own_staked);
        if grantor_level <= agent_level {
            return Err(StakeError::LevelViolation { grantor_level, agent_level });
        }
        if agent_fee > break_fee_bps || agent_floor < break_min_own_staked {
            return Err(StakeError::TermsViolation(format!(
                "agent {agent} terms (fee {agent_fee} bps, floor {agent_floor}) \
                 outside break conditions"
            )));
        }

        let existing = tx.grant(grantor, agent)?;
        let pct_sum: u64 = tx
            .grants_of(grantor)?
            .iter()
            .filter(|g| g.agent != *agent)
            .map(|g| g.pct_bps as u64)
            .sum::<u64>()
            + pct_bps as u64;
        if pct_sum > BPS_DENOM {
            return Err(StakeError::BadParams(format!(
                "auto-route total {pct_sum} bps exceeds {BPS_DENOM}"
            )));
        }

        match existing {
            Some(mut edge) => {
                if edge.pct_bps == pct_bps
                    && edge.break_fee_bps == break_fee_bps
                    && edge.break_min_own_staked == break_min_own_staked
                {
                    return Err(StakeError::TermsUnchanged);
                }
                edge.pct_bps = pct_bps;
                edge.break_fee_bps = break_fee_bps;
                edge.break_min_own_staked = break_min_own_staked;
                if edge.is_empty() {
                    tx.delete_grant(grantor, agent);
                } else {
                    tx.put_grant(edge);
                }
            }
            None => {
                if pct_bps == 0 {
                    return Err(StakeError::TermsUnchanged);
                }
                let cap = tx.params().fanout_cap(grantor_level);
                let count = tx.grants_of(grantor)?.len();
                if count >= cap as usize {
                    return Err(StakeError::FanoutExceeded { level: grantor_level, max: cap });
                }
                let mut edge = Grant::new(asset, *grantor, *agent);
                edge.pct_bps = pct_bps;
                edge.break_fee_bps = break_fee_bps;
                edge.break_min_own_staked = break_min_own_staked;
                tx.put_grant(edge);
            }
        }

        tx.commit()?;
        info!(%asset, %grantor, %agent, pct_bps, "grant terms set");
        Ok(())
    }
}
