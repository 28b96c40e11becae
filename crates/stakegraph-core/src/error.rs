use thiserror::Error;

#[derive(Debug, Error)]
pub enum StakeError {
    // ── User errors ──────────────────────────────────────────────────────────
    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: u64, have: u64 },

    #[error("proxy level violation: grantor level {grantor_level} must exceed agent level {agent_level}")]
    LevelViolation { grantor_level: u8, agent_level: u8 },

    #[error("fan-out exceeded: level {level} allows at most {max} outgoing grants")]
    FanoutExceeded { level: u8, max: u16 },

    #[error("terms edit is a no-op")]
    TermsUnchanged,

    #[error("agent terms violate the grant's break terms: {0}")]
    TermsViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("basis-point value out of range: {0}")]
    BadBps(u16),

    #[error("invalid parameters: {0}")]
    BadParams(String),

    // ── Fatal ────────────────────────────────────────────────────────────────
    /// Internal consistency failure. Indicates a logic bug, never a user
    /// error; callers must not retry.
    #[error("system invariant violated: {0}")]
    SystemInvariant(String),

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}
