use std::collections::{BTreeMap, BTreeSet};

use stakegraph_core::error::StakeError;
use stakegraph_core::params::LedgerParams;
use stakegraph_core::record::{Agent, Grant, Payout, ProvisionEdge};
use stakegraph_core::types::{AccountId, AssetId};
use stakegraph_store::StakeDb;

use crate::engine::Release;

// ── Staged transaction ────────────────────────────────────────────────────────

/// Read-through overlay over the store for one atomic operation.
///
/// Reads fall through to the database until a record is touched, after which
/// later reads observe staged writes (the traversals depend on this).
/// `commit` re-checks the share/funds invariants on every touched agent and
/// then writes everything in one pass; dropping the overlay discards all
/// staged mutations.
pub(crate) struct LedgerTx<'a> {
    db: &'a StakeDb,
    asset: AssetId,
    params: LedgerParams,
    agents: BTreeMap<AccountId, Agent>,
    /// `None` marks a staged deletion.
    grants: BTreeMap<(AccountId, AccountId), Option<Grant>>,
    payouts: BTreeMap<(AccountId, u64), Option<Payout>>,
    provisions: BTreeMap<(AccountId, AccountId), Option<ProvisionEdge>>,
    releases: Vec<Release>,
}

const ACCT_MIN: AccountId = AccountId([0u8; 32]);
const ACCT_MAX: AccountId = AccountId([0xffu8; 32]);

impl<'a> LedgerTx<'a> {
    pub fn begin(db: &'a StakeDb, asset: AssetId) -> Result<Self, StakeError> {
        let params = db
            .get_params(asset)?
            .ok_or_else(|| StakeError::NotFound(format!("ledger params for {asset}")))?;
        Ok(Self {
            db,
            asset,
            params,
            agents: BTreeMap::new(),
            grants: BTreeMap::new(),
            payouts: BTreeMap::new(),
            provisions: BTreeMap::new(),
            releases: Vec::new(),
        })
    }

    pub fn asset(&self) -> AssetId {
        self.asset
    }

    pub fn params(&self) -> &LedgerParams {
        &self.params
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    fn load_agent(&mut self, account: &AccountId) -> Result<(), StakeError> {
        if !self.agents.contains_key(account) {
            if let Some(a) = self.db.get_agent(self.asset, account)? {
                self.agents.insert(*account, a);
            }
        }
        Ok(())
    }

    pub fn agent(&mut self, account: &AccountId) -> Result<&Agent, StakeError> {
        self.load_agent(account)?;
        self.agents
            .get(account)
            .ok_or_else(|| StakeError::NotFound(format!("agent {account}")))
    }

    pub fn agent_mut(&mut self, account: &AccountId) -> Result<&mut Agent, StakeError> {
        self.load_agent(account)?;
        self.agents
            .get_mut(account)
            .ok_or_else(|| StakeError::NotFound(format!("agent {account}")))
    }

    pub fn has_agent(&mut self, account: &AccountId) -> Result<bool, StakeError> {
        self.load_agent(account)?;
        Ok(self.agents.contains_key(account))
    }

    /// Create-on-demand lookup; fresh agents start at the maximum proxy level.
    pub fn open_agent(&mut self, account: &AccountId) -> Result<&mut Agent, StakeError> {
        self.load_agent(account)?;
        let asset = self.asset;
        let max_level = self.params.max_level();
        Ok(self
            .agents
            .entry(*account)
            .or_insert_with(|| Agent::new(asset, *account, max_level)))
    }

    // ── Grants ───────────────────────────────────────────────────────────────

    pub fn grant(
        &mut self,
        grantor: &AccountId,
        agent: &AccountId,
    ) -> Result<Option<Grant>, StakeError> {
        if let Some(staged) = self.grants.get(&(*grantor, *agent)) {
            return Ok(staged.clone());
        }
        self.db.get_grant(self.asset, grantor, agent)
    }

    pub fn put_grant(&mut self, grant: Grant) {
        self.grants.insert((grant.grantor, grant.agent), Some(grant));
    }

    pub fn delete_grant(&mut self, grantor: &AccountId, agent: &AccountId) {
        self.grants.insert((*grantor, *agent), None);
    }

    /// Outgoing grants of `grantor` in agent-key order, staged writes merged.
    pub fn grants_of(&mut self, grantor: &AccountId) -> Result<Vec<Grant>, StakeError> {
        let mut merged: BTreeMap<AccountId, Grant> = BTreeMap::new();
        for g in self.db.grants_of(self.asset, grantor)? {
            merged.insert(g.agent, g);
        }
        for ((_, agent), staged) in self.grants.range((*grantor, ACCT_MIN)..=(*grantor, ACCT_MAX)) {
            match staged {
                Some(g) => {
                    merged.insert(*agent, g.clone());
                }
                None => {
                    merged.remove(agent);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Grantor accounts with an edge into `agent`, staged writes merged.
    pub fn grantors_of(&mut self, agent: &AccountId) -> Result<Vec<AccountId>, StakeError> {
        let mut set: BTreeSet<AccountId> =
            self.db.grantors_of(self.asset, agent)?.into_iter().collect();
        for ((grantor, target), staged) in self.grants.iter() {
            if target == agent {
                match staged {
                    Some(_) => {
                        set.insert(*grantor);
                    }
                    None => {
                        set.remove(grantor);
                    }
                }
            }
        }
        Ok(set.into_iter().collect())
    }

    // ── Payouts ──────────────────────────────────────────────────────────────

    pub fn payouts_of(&mut self, account: &AccountId) -> Result<Vec<Payout>, StakeError> {
        let mut merged: BTreeMap<u64, Payout> = BTreeMap::new();
        for p in self.db.payouts_of(self.asset, account)? {
            merged.insert(p.id, p);
        }
        for ((_, id), staged) in self.payouts.range((*account, 0)..=(*account, u64::MAX)) {
            match staged {
                Some(p) => {
                    merged.insert(*id, p.clone());
                }
                None => {
                    merged.remove(id);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    pub fn put_payout(&mut self, payout: Payout) {
        self.payouts.insert((payout.account, payout.id), Some(payout));
    }

    pub fn delete_payout(&mut self, account: &AccountId, id: u64) {
        self.payouts.insert((*account, id), None);
    }

    /// Allocate a payout id. The meta counter advances even if this
    /// transaction later aborts; gaps in the sequence are harmless.
    pub fn new_payout_id(&mut self) -> Result<u64, StakeError> {
        self.db.next_payout_id()
    }

    // ── Provisions ───────────────────────────────────────────────────────────

    pub fn provision(
        &mut self,
        grantor: &AccountId,
        recipient: &AccountId,
    ) -> Result<Option<ProvisionEdge>, StakeError> {
        if let Some(staged) = self.provisions.get(&(*grantor, *recipient)) {
            return Ok(staged.clone());
        }
        self.db.get_provision(self.asset, grantor, recipient)
    }

    pub fn put_provision(&mut self, edge: ProvisionEdge) {
        self.provisions.insert((edge.grantor, edge.recipient), Some(edge));
    }

    pub fn delete_provision(&mut self, grantor: &AccountId, recipient: &AccountId) {
        self.provisions.insert((*grantor, *recipient), None);
    }

    /// Lenders with an edge into `recipient`, staged writes merged.
    pub fn providers_of(&mut self, recipient: &AccountId) -> Result<Vec<AccountId>, StakeError> {
        let mut set: BTreeSet<AccountId> =
            self.db.providers_of(self.asset, recipient)?.into_iter().collect();
        for ((grantor, target), staged) in self.provisions.iter() {
            if target == recipient {
                match staged {
                    Some(_) => {
                        set.insert(*grantor);
                    }
                    None => {
                        set.remove(grantor);
                    }
                }
            }
        }
        Ok(set.into_iter().collect())
    }

    // ── Releases ─────────────────────────────────────────────────────────────

    pub fn push_release(&mut self, release: Release) {
        self.releases.push(release);
    }

    // ── Commit ───────────────────────────────────────────────────────────────

    pub fn commit(self) -> Result<Vec<Release>, StakeError> {
        for agent in self.agents.values() {
            if (agent.total_funds() == 0) != (agent.shares_sum == 0) {
                return Err(StakeError::SystemInvariant(format!(
                    "agent {}: total_funds {} and shares_sum {} zero mismatch",
                    agent.account,
                    agent.total_funds(),
                    agent.shares_sum
                )));
            }
            if agent.own_share > agent.shares_sum {
                return Err(StakeError::SystemInvariant(format!(
                    "agent {}: own_share {} exceeds shares_sum {}",
                    agent.account, agent.own_share, agent.shares_sum
                )));
            }
        }
        for staged in self.provisions.values().flatten() {
            if staged.received > staged.provided {
                return Err(StakeError::SystemInvariant(format!(
                    "provision {} -> {}: received {} exceeds provided {}",
                    staged.grantor, staged.recipient, staged.received, staged.provided
                )));
            }
        }

        for agent in self.agents.values() {
            self.db.put_agent(agent)?;
        }
        for ((grantor, agent), staged) in &self.grants {
            match staged {
                Some(g) => self.db.put_grant(g)?,
                None => self.db.remove_grant(self.asset, grantor, agent)?,
            }
        }
        for ((account, id), staged) in &self.payouts {
            match staged {
                Some(p) => self.db.put_payout(p)?,
                None => self.db.remove_payout(self.asset, account, *id)?,
            }
        }
        for ((grantor, recipient), staged) in &self.provisions {
            match staged {
                Some(e) => self.db.put_provision(e)?,
                None => self.db.remove_provision(self.asset, grantor, recipient)?,
            }
        }
        Ok(self.releases)
    }
}
