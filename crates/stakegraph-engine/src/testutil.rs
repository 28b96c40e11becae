//! Shared fixtures for the engine test modules.

use std::sync::{Arc, Mutex};

use stakegraph_core::error::StakeError;
use stakegraph_core::params::LedgerParams;
use stakegraph_core::types::{AccountId, AssetId, Balance};
use stakegraph_store::StakeDb;

use crate::engine::{NullLedger, StakeEngine, TokenLedger};

pub fn engine(name: &str) -> StakeEngine {
    engine_with_ledger(name, Arc::new(NullLedger))
}

pub fn engine_with_ledger(name: &str, ledger: Arc<dyn TokenLedger>) -> StakeEngine {
    let dir = std::env::temp_dir().join(format!("stakegraph_engine_test_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    let db = Arc::new(StakeDb::open(&dir).expect("open temp db"));
    StakeEngine::new(db, ledger)
}

/// Three proxy levels, four vesting steps of 100 seconds each.
pub fn base_params(asset: AssetId) -> LedgerParams {
    LedgerParams {
        asset,
        max_fanout: vec![8, 8, 8],
        payout_step_secs: 100,
        payout_steps: 4,
        min_own_staked_for_election: 0,
    }
}

/// Token ledger that records every outbound transfer.
#[derive(Default)]
pub struct RecordingLedger {
    out: Mutex<Vec<(AccountId, Balance)>>,
}

impl RecordingLedger {
    pub fn transfers(&self) -> Vec<(AccountId, Balance)> {
        self.out.lock().expect("ledger mutex").clone()
    }
}

impl TokenLedger for RecordingLedger {
    fn transfer_out(
        &self,
        _asset: AssetId,
        account: &AccountId,
        amount: Balance,
    ) -> Result<(), StakeError> {
        self.out.lock().expect("ledger mutex").push((*account, amount));
        Ok(())
    }
}
