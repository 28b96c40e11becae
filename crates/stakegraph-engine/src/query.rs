//! Read-only election and inspection queries.

use stakegraph_core::error::StakeError;
use stakegraph_core::params::LedgerParams;
use stakegraph_core::record::{Agent, Grant, Payout};
use stakegraph_core::types::{AccountId, AssetId, Balance};
use stakegraph_store::StakeDb;

/// Read-side companion to the engine; cheap to construct per call.
pub struct StakeQuery<'a> {
    db: &'a StakeDb,
}

impl<'a> StakeQuery<'a> {
    pub fn new(db: &'a StakeDb) -> Self {
        Self { db }
    }

    fn params(&self, asset: AssetId) -> Result<LedgerParams, StakeError> {
        self.db
            .get_params(asset)?
            .ok_or_else(|| StakeError::NotFound(format!("ledger params for {asset}")))
    }

    /// The `n` election-eligible agents with the most direct votes, ranked
    /// by votes descending with account id as the tie break.
    ///
    /// Eligible means: level 0, non-zero votes, a registered signing key,
    /// and own stake at or above the election floor.
    pub fn top_n(
        &self,
        asset: AssetId,
        n: usize,
    ) -> Result<Vec<(AccountId, Balance)>, StakeError> {
        let params = self.params(asset)?;
        let mut out = Vec::with_capacity(n.min(64));
        for (votes, account) in self.db.iter_votes(asset)? {
            if out.len() >= n || votes == 0 {
                break;
            }
            let agent = match self.db.get_agent(asset, &account)? {
                Some(a) => a,
                None => continue,
            };
            if agent.signing_key.is_none() || agent.balance < params.min_own_staked_for_election {
                continue;
            }
            out.push((account, votes));
        }
        Ok(out)
    }

    /// Total direct votes across all level-0 agents.
    pub fn votes_sum(&self, asset: AssetId) -> Result<Balance, StakeError> {
        let mut sum = 0;
        for (votes, _) in self.db.iter_votes(asset)? {
            sum += votes;
        }
        Ok(sum)
    }

    pub fn get_agent(
        &self,
        asset: AssetId,
        account: &AccountId,
    ) -> Result<Option<Agent>, StakeError> {
        self.db.get_agent(asset, account)
    }

    pub fn get_grant(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        agent: &AccountId,
    ) -> Result<Option<Grant>, StakeError> {
        self.db.get_grant(asset, grantor, agent)
    }

    pub fn pending_payouts(
        &self,
        asset: AssetId,
        account: &AccountId,
    ) -> Result<Vec<Payout>, StakeError> {
        self.db.payouts_of(asset, account)
    }
}
