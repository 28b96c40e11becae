use std::path::Path;

use stakegraph_core::error::StakeError;
use stakegraph_core::params::LedgerParams;
use stakegraph_core::record::{Agent, Grant, Payout, ProvisionEdge};
use stakegraph_core::types::{AccountId, AssetId, Balance};

/// Persistent ledger database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees (analogous to column families):
///   params         — asset(8)                            → bincode(LedgerParams)
///   agents         — asset(8)‖account(32)                → bincode(Agent)
///   votes_idx      — asset(8)‖!votes BE(8)‖account(32)   → [] (membership)
///   grants         — asset(8)‖grantor(32)‖agent(32)      → bincode(Grant)
///   grants_in      — asset(8)‖agent(32)‖grantor(32)      → [] (membership)
///   payouts        — asset(8)‖account(32)‖id BE(8)       → bincode(Payout)
///   provisions     — asset(8)‖grantor(32)‖recipient(32)  → bincode(ProvisionEdge)
///   provisions_in  — asset(8)‖recipient(32)‖grantor(32)  → [] (membership)
///   meta           — utf8 key bytes                      → raw bytes
///
/// Inverting the vote count in `votes_idx` keys makes ascending key order
/// equal (votes desc, account asc) — exactly the top-N ranking order.
pub struct StakeDb {
    _db: sled::Db,
    params: sled::Tree,
    agents: sled::Tree,
    votes_idx: sled::Tree,
    grants: sled::Tree,
    grants_in: sled::Tree,
    payouts: sled::Tree,
    provisions: sled::Tree,
    provisions_in: sled::Tree,
    meta: sled::Tree,
}

fn storage_err(e: sled::Error) -> StakeError {
    StakeError::Storage(e.to_string())
}

fn ser<T: serde::Serialize>(v: &T) -> Result<Vec<u8>, StakeError> {
    bincode::serialize(v).map_err(|e| StakeError::Serialization(e.to_string()))
}

fn de<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StakeError> {
    bincode::deserialize(bytes).map_err(|e| StakeError::Serialization(e.to_string()))
}

// ── Key builders ──────────────────────────────────────────────────────────────

fn agent_key(asset: AssetId, account: &AccountId) -> [u8; 40] {
    let mut k = [0u8; 40];
    k[..8].copy_from_slice(&asset.key_bytes());
    k[8..].copy_from_slice(account.as_bytes());
    k
}

fn votes_key(asset: AssetId, votes: Balance, account: &AccountId) -> [u8; 48] {
    let mut k = [0u8; 48];
    k[..8].copy_from_slice(&asset.key_bytes());
    k[8..16].copy_from_slice(&(!votes).to_be_bytes());
    k[16..].copy_from_slice(account.as_bytes());
    k
}

fn edge_key(asset: AssetId, a: &AccountId, b: &AccountId) -> [u8; 72] {
    let mut k = [0u8; 72];
    k[..8].copy_from_slice(&asset.key_bytes());
    k[8..40].copy_from_slice(a.as_bytes());
    k[40..].copy_from_slice(b.as_bytes());
    k
}

fn payout_key(asset: AssetId, account: &AccountId, id: u64) -> [u8; 48] {
    let mut k = [0u8; 48];
    k[..8].copy_from_slice(&asset.key_bytes());
    k[8..40].copy_from_slice(account.as_bytes());
    k[40..].copy_from_slice(&id.to_be_bytes());
    k
}

fn scope_prefix(asset: AssetId, account: &AccountId) -> [u8; 40] {
    agent_key(asset, account)
}

fn account_from_slice(bytes: &[u8]) -> AccountId {
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    AccountId::from_bytes(arr)
}

impl StakeDb {
    /// Open or create the ledger database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StakeError> {
        let db = sled::open(&path).map_err(storage_err)?;
        tracing::info!(path = %path.as_ref().display(), recovered = db.was_recovered(), "store opened");
        let params        = db.open_tree("params").map_err(storage_err)?;
        let agents        = db.open_tree("agents").map_err(storage_err)?;
        let votes_idx     = db.open_tree("votes_idx").map_err(storage_err)?;
        let grants        = db.open_tree("grants").map_err(storage_err)?;
        let grants_in     = db.open_tree("grants_in").map_err(storage_err)?;
        let payouts       = db.open_tree("payouts").map_err(storage_err)?;
        let provisions    = db.open_tree("provisions").map_err(storage_err)?;
        let provisions_in = db.open_tree("provisions_in").map_err(storage_err)?;
        let meta          = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self {
            _db: db,
            params,
            agents,
            votes_idx,
            grants,
            grants_in,
            payouts,
            provisions,
            provisions_in,
            meta,
        })
    }

    // ── Params ───────────────────────────────────────────────────────────────

    pub fn get_params(&self, asset: AssetId) -> Result<Option<LedgerParams>, StakeError> {
        match self.params.get(asset.key_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_params(&self, params: &LedgerParams) -> Result<(), StakeError> {
        self.params
            .insert(params.asset.key_bytes(), ser(params)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    pub fn get_agent(
        &self,
        asset: AssetId,
        account: &AccountId,
    ) -> Result<Option<Agent>, StakeError> {
        match self.agents.get(agent_key(asset, account)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write an agent, keeping `votes_idx` in sync by diffing against the
    /// previous record.
    pub fn put_agent(&self, agent: &Agent) -> Result<(), StakeError> {
        let prev = self
            .agents
            .insert(agent_key(agent.asset, &agent.account), ser(agent)?)
            .map_err(storage_err)?;

        let old_votes = match prev {
            Some(bytes) => de::<Agent>(&bytes)?.votes,
            None => None,
        };
        if old_votes != agent.votes {
            if let Some(v) = old_votes {
                self.votes_idx
                    .remove(votes_key(agent.asset, v, &agent.account))
                    .map_err(storage_err)?;
            }
            if let Some(v) = agent.votes {
                self.votes_idx
                    .insert(votes_key(agent.asset, v, &agent.account), b"".as_ref())
                    .map_err(storage_err)?;
            }
        }
        Ok(())
    }

    /// Accounts in (votes desc, account asc) order. The caller filters on
    /// signing key and eligibility floor.
    pub fn iter_votes(&self, asset: AssetId) -> Result<Vec<(Balance, AccountId)>, StakeError> {
        let mut out = Vec::new();
        for item in self.votes_idx.scan_prefix(asset.key_bytes()) {
            let (key, _) = item.map_err(storage_err)?;
            let mut inv = [0u8; 8];
            inv.copy_from_slice(&key[8..16]);
            let votes = !u64::from_be_bytes(inv);
            out.push((votes, account_from_slice(&key[16..48])));
        }
        Ok(out)
    }

    // ── Grants ───────────────────────────────────────────────────────────────

    pub fn get_grant(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        agent: &AccountId,
    ) -> Result<Option<Grant>, StakeError> {
        match self.grants.get(edge_key(asset, grantor, agent)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_grant(&self, grant: &Grant) -> Result<(), StakeError> {
        self.grants
            .insert(edge_key(grant.asset, &grant.grantor, &grant.agent), ser(grant)?)
            .map_err(storage_err)?;
        self.grants_in
            .insert(edge_key(grant.asset, &grant.agent, &grant.grantor), b"".as_ref())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn remove_grant(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        agent: &AccountId,
    ) -> Result<(), StakeError> {
        self.grants
            .remove(edge_key(asset, grantor, agent))
            .map_err(storage_err)?;
        self.grants_in
            .remove(edge_key(asset, agent, grantor))
            .map_err(storage_err)?;
        Ok(())
    }

    /// Outgoing grants of `grantor`, in agent-key order (the traversal order).
    pub fn grants_of(&self, asset: AssetId, grantor: &AccountId) -> Result<Vec<Grant>, StakeError> {
        let mut out = Vec::new();
        for item in self.grants.scan_prefix(scope_prefix(asset, grantor)) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(de(&bytes)?);
        }
        Ok(out)
    }

    /// Grantor accounts holding an edge into `agent`, in key order.
    pub fn grantors_of(
        &self,
        asset: AssetId,
        agent: &AccountId,
    ) -> Result<Vec<AccountId>, StakeError> {
        let mut out = Vec::new();
        for item in self.grants_in.scan_prefix(scope_prefix(asset, agent)) {
            let (key, _) = item.map_err(storage_err)?;
            out.push(account_from_slice(&key[40..72]));
        }
        Ok(out)
    }

    // ── Payouts ──────────────────────────────────────────────────────────────

    pub fn put_payout(&self, payout: &Payout) -> Result<(), StakeError> {
        self.payouts
            .insert(payout_key(payout.asset, &payout.account, payout.id), ser(payout)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn remove_payout(
        &self,
        asset: AssetId,
        account: &AccountId,
        id: u64,
    ) -> Result<(), StakeError> {
        self.payouts
            .remove(payout_key(asset, account, id))
            .map_err(storage_err)?;
        Ok(())
    }

    /// Pending payouts of `account`, oldest id first.
    pub fn payouts_of(
        &self,
        asset: AssetId,
        account: &AccountId,
    ) -> Result<Vec<Payout>, StakeError> {
        let mut out = Vec::new();
        for item in self.payouts.scan_prefix(scope_prefix(asset, account)) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(de(&bytes)?);
        }
        Ok(out)
    }

    /// Allocate the next payout id from the meta counter.
    pub fn next_payout_id(&self) -> Result<u64, StakeError> {
        let next = match self.meta.get(b"next_payout_id").map_err(storage_err)? {
            Some(bytes) => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&bytes);
                u64::from_be_bytes(arr)
            }
            None => 1,
        };
        self.meta
            .insert(b"next_payout_id", &(next + 1).to_be_bytes())
            .map_err(storage_err)?;
        Ok(next)
    }

    // ── Provisions ───────────────────────────────────────────────────────────

    pub fn get_provision(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        recipient: &AccountId,
    ) -> Result<Option<ProvisionEdge>, StakeError> {
        match self
            .provisions
            .get(edge_key(asset, grantor, recipient))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_provision(&self, edge: &ProvisionEdge) -> Result<(), StakeError> {
        self.provisions
            .insert(edge_key(edge.asset, &edge.grantor, &edge.recipient), ser(edge)?)
            .map_err(storage_err)?;
        self.provisions_in
            .insert(edge_key(edge.asset, &edge.recipient, &edge.grantor), b"".as_ref())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn remove_provision(
        &self,
        asset: AssetId,
        grantor: &AccountId,
        recipient: &AccountId,
    ) -> Result<(), StakeError> {
        self.provisions
            .remove(edge_key(asset, grantor, recipient))
            .map_err(storage_err)?;
        self.provisions_in
            .remove(edge_key(asset, recipient, grantor))
            .map_err(storage_err)?;
        Ok(())
    }

    /// Grantor accounts lending into `recipient`, in key order.
    pub fn providers_of(
        &self,
        asset: AssetId,
        recipient: &AccountId,
    ) -> Result<Vec<AccountId>, StakeError> {
        let mut out = Vec::new();
        for item in self.provisions_in.scan_prefix(scope_prefix(asset, recipient)) {
            let (key, _) = item.map_err(storage_err)?;
            out.push(account_from_slice(&key[40..72]));
        }
        Ok(out)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), StakeError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}
