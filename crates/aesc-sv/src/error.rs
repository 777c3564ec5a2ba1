//! Error types for the SV ledger.

use thiserror::Error;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ledger operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Weight was negative, not finite, or above the per-accrual cap.
    #[error("weight must be a finite number between 0 and 1000000, got {0}")]
    InvalidWeight(f64),

    /// A running total would leave the finite range.
    #[error("SV total for node {0} out of range")]
    Overflow(String),

    /// Activity kind not in the scoring table.
    #[error("unknown activity kind: {0}")]
    UnknownKind(String),

    /// Node id was empty.
    #[error("node id must not be empty")]
    EmptyNodeId,

    /// Compare-and-swap kept losing to concurrent writers.
    #[error("too much contention updating node {0}")]
    Contention(String),

    /// Backing store failed.
    #[error("store error: {0}")]
    Store(String),
}
