//! stakegraph-store
//!
//! Persistent state for the staking ledger, backed by sled. Named trees act
//! as column families; composite big-endian keys give every record family a
//! per-asset scope and the ordered secondary indexes (vote ranking,
//! incoming-grant and incoming-provision lookup) the engine relies on.

pub mod db;

pub use db::StakeDb;
