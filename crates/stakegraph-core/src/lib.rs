//! stakegraph-core
//!
//! Domain types and arithmetic shared by the store and the engine: ids,
//! balances, agent/grant/payout records, per-asset parameters, and the
//! error type every fallible operation returns.

pub mod error;
pub mod math;
pub mod params;
pub mod record;
pub mod types;

pub use error::StakeError;
pub use math::*;
pub use params::*;
pub use record::*;
pub use types::*;
