use serde::{Deserialize, Serialize};

use crate::error::StakeError;
use crate::types::{AssetId, Balance, Bps};

/// Per-asset ledger configuration.
///
/// Immutable after creation except through an explicit admin update. Passed
/// into every engine call rather than read from ambient globals, so the
/// engine is testable with varied configurations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LedgerParams {
    pub asset: AssetId,
    /// `max_fanout[l - 1]` caps outgoing grants for agents at proxy level
    /// `l`. The vector length is the maximum proxy level; level 0 agents
    /// (ultimate voters) can have no outgoing grants at all, which the
    /// strict-descent rule already guarantees.
    pub max_fanout: Vec<Bps>,
    /// Length of one vesting step in seconds.
    pub payout_step_secs: i64,
    /// Number of vesting steps a withdrawal is spread over.
    pub payout_steps: u32,
    /// Own-stake floor below which a level-0 agent is not election-eligible.
    pub min_own_staked_for_election: Balance,
}

impl LedgerParams {
    /// Maximum proxy level admitted by this configuration.
    pub fn max_level(&self) -> u8 {
        self.max_fanout.len() as u8
    }

    /// Outgoing-grant cap for `level`. Level 0 is always 0, as is any level
    /// beyond the configured depth (params may shrink after agents were
    /// placed at a higher level; those agents can no longer open edges).
    pub fn fanout_cap(&self, level: u8) -> u16 {
        if level == 0 {
            0
        } else {
            self.max_fanout.get(level as usize - 1).copied().unwrap_or(0)
        }
    }

    pub fn validate(&self) -> Result<(), StakeError> {
        if self.max_fanout.is_empty() || self.max_fanout.len() > u8::MAX as usize {
            return Err(StakeError::BadParams(
                "max_fanout must have between 1 and 255 levels".into(),
            ));
        }
        if self.payout_step_secs <= 0 {
            return Err(StakeError::BadParams("payout_step_secs must be positive".into()));
        }
        if self.payout_steps == 0 {
            return Err(StakeError::BadParams("payout_steps must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> LedgerParams {
        LedgerParams {
            asset: AssetId(1),
            max_fanout: vec![10, 20, 30],
            payout_step_secs: 86_400,
            payout_steps: 4,
            min_own_staked_for_election: 0,
        }
    }

    #[test]
    fn level_and_cap_lookup() {
        let p = base();
        assert_eq!(p.max_level(), 3);
        assert_eq!(p.fanout_cap(0), 0);
        assert_eq!(p.fanout_cap(1), 10);
        assert_eq!(p.fanout_cap(3), 30);
        // Out-of-range levels cap at zero rather than panicking.
        assert_eq!(p.fanout_cap(4), 0);
        assert_eq!(p.fanout_cap(u8::MAX), 0);
    }

    #[test]
    fn rejects_degenerate_config() {
        let mut p = base();
        p.max_fanout.clear();
        assert!(p.validate().is_err());

        let mut p = base();
        p.payout_steps = 0;
        assert!(p.validate().is_err());

        let mut p = base();
        p.payout_step_secs = 0;
        assert!(p.validate().is_err());
    }
}
