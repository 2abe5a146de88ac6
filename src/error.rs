use thiserror::Error;

/// Crate-level error type.
///
/// `ValueError` from the HLC/codec parsing rules is deliberately absent
/// here: malformed packed timestamps and unparseable scalar values are
/// always recovered inline (see [`crate::hlc`] and [`crate::codec`]) and
/// never propagate as an `Error`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("remote clock drift {drift_ms}ms exceeds max {max_drift_ms}ms")]
    TimeDrift { drift_ms: i64, max_drift_ms: u64 },

    #[error("replicator has been disposed")]
    Disposed,

    #[error("local store returned inconsistent state: {0}")]
    ContractViolation(String),

    #[error("local store error: {0}")]
    Local(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("remote store error: {0}")]
    Remote(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;
