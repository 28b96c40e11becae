use serde::{Deserialize, Serialize};
use std::fmt;

/// Stake in base token units. All proportional conversions go through
/// `math::prop` / `math::prop_ceil`, which widen to u128, so u64 balances
/// can never overflow mid-computation.
pub type Balance = u64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Basis points. 10_000 = 100%.
pub type Bps = u16;

/// Basis-point denominator.
pub const BPS_DENOM: u64 = 10_000;

// ── AccountId ────────────────────────────────────────────────────────────────

/// 32-byte account identifier, assigned by the external identity system.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a stable id from a human-readable name (BLAKE3). Handy for
    /// tests and tooling; production ids come from the identity system.
    pub fn named(name: &str) -> Self {
        Self(*blake3::hash(name.as_bytes()).as_bytes())
    }

    /// Base-58 encoded string representation.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", &self.to_b58()[..8])
    }
}

// ── AssetId ──────────────────────────────────────────────────────────────────

/// Asset (staking token) identifier. Each asset carries its own parameter
/// record, agent table and grant graph; assets never interact.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u64);

impl AssetId {
    /// Big-endian bytes, used as the leading segment of every store key so
    /// that prefix scans stay scoped to one asset.
    pub fn key_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset#{}", self.0)
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.0)
    }
}

// ── SigningKey ───────────────────────────────────────────────────────────────

/// Opaque 32-byte signing key registered by an agent for block production.
/// The ledger never verifies signatures; the election-facing caller does.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey(pub [u8; 32]);

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey({}…)", &hex::encode(self.0)[..8])
    }
}
