//! Error types for Meshwork.
//!
//! Every error leaves the HTTP layer as `{ok:false, error}` with a status
//! that reflects its category. Server-side failures are logged with detail
//! and answered with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type for Meshwork operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Meshwork operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input
    #[error("{0}")]
    InvalidInput(String),

    /// Signature did not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// Timestamp too far from server time
    #[error("timestamp outside allowed window")]
    StaleTimestamp,

    /// No credential registered for the node
    #[error("unknown node")]
    UnknownNode,

    /// Nonce seen before
    #[error("nonce already used")]
    NonceReused,

    /// Not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("already exists: {0}")]
    Conflict(String),

    /// Upload too large
    #[error("payload too large (max {max} bytes)")]
    PayloadTooLarge { max: usize },

    /// Rate limited
    #[error("too many requests")]
    RateLimited,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Mail provider error
    #[error("mail error: {0}")]
    Mail(String),

    /// SV ledger error
    #[error("ledger error: {0}")]
    Ledger(#[from] aesc_sv::Error),

    /// Rendering error (QR codes)
    #[error("render error: {0}")]
    Render(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<aesc_sign::Error> for Error {
    fn from(e: aesc_sign::Error) -> Self {
        match e {
            aesc_sign::Error::InvalidSignature => Error::InvalidSignature,
            other => Error::InvalidInput(other.to_string()),
        }
    }
}

impl Error {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_)
            | Error::InvalidSignature
            | Error::StaleTimestamp
            | Error::UnknownNode
            | Error::NonceReused => StatusCode::BAD_REQUEST,
            Error::Ledger(e) => match e {
                aesc_sv::Error::InvalidWeight(_)
                | aesc_sv::Error::Overflow(_)
                | aesc_sv::Error::UnknownKind(_)
                | aesc_sv::Error::EmptyNodeId => StatusCode::BAD_REQUEST,
                aesc_sv::Error::Contention(_) => StatusCode::SERVICE_UNAVAILABLE,
                aesc_sv::Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Config(_)
            | Error::Storage(_)
            | Error::Mail(_)
            | Error::Render(_)
            | Error::Serialization(_)
            | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Error::Mail(_) => "failed to send message".to_string(),
            Error::Ledger(aesc_sv::Error::Contention(_)) => "busy, try again".to_string(),
            _ if self.status().is_server_error() => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = ErrorBody {
            ok: false,
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
