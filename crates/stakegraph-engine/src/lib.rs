//! stakegraph-engine
//!
//! The staking/voting accounting engine. Deposits and rewards enter through
//! `StakeEngine`, which pushes new value through the grant graph with an
//! iterative work-stack traversal, serves vote-weight queries from the
//! store's ranking index, and schedules time-vested withdrawals.
//!
//! Every mutating entry point stages its writes in a `LedgerTx` overlay and
//! commits atomically: on any error the whole call is rejected with no
//! partial mutation visible.

pub mod engine;
pub mod query;

mod provision;
mod registry;
mod traversal;
mod tx;
mod vesting;

pub use engine::{NullLedger, Release, StakeEngine, TokenLedger};
pub use query::StakeQuery;

#[cfg(test)]
pub(crate) mod testutil;
