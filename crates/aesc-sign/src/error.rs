//! Error types for aesc-sign.

use thiserror::Error;

/// Result type for signing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or checking signatures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// A hex field could not be decoded.
    #[error("invalid hex in {field}")]
    InvalidHex { field: &'static str },

    /// A key had the wrong length or was not a valid point.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A secret was empty.
    #[error("secret must not be empty")]
    EmptySecret,
}
