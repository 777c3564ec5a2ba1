//! Data models for Meshwork.
//!
//! # Core Types
//!
//! - [`StoredPing`] - A verified (or advisory) presence claim as persisted
//! - [`NodeSummary`] - Latest sighting per node, the map's data source
//! - [`NodeCredential`] - Verification key registered for a node
//! - [`Signal`] - Free-text and media post attached to a node
//!
//! Input validation helpers shared by the API live here too.

mod node;
mod ping;
mod signal;

pub use node::{NodeCredential, NodeSummary};
pub use ping::StoredPing;
pub use signal::{Signal, MAX_SIGNAL_CONTENT_CHARS};

use crate::error::{Error, Result};

/// Longest accepted node id, sticker id or nonce.
pub const MAX_TOKEN_LEN: usize = 128;

/// Shortest accepted nonce.
pub const MIN_NONCE_LEN: usize = 8;

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Check an identifier-like field: 1..=len ASCII alphanumerics or `-_.`.
///
/// Keeps ids free of the `|` message separator and of the `:` used in
/// storage keys.
pub fn validate_token(field: &str, value: &str, min_len: usize) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{field} is required")));
    }
    if value.len() < min_len || value.len() > MAX_TOKEN_LEN {
        return Err(Error::InvalidInput(format!(
            "{field} must be {min_len}-{MAX_TOKEN_LEN} characters"
        )));
    }
    if !value.chars().all(is_token_char) {
        return Err(Error::InvalidInput(format!("{field} contains invalid characters")));
    }
    Ok(())
}

/// Validate a node id.
pub fn validate_node_id(node_id: &str) -> Result<()> {
    validate_token("nodeId", node_id, 1)
}

/// Validate an optional coordinate pair.
pub fn validate_coords(lat: Option<f64>, lon: Option<f64>) -> Result<()> {
    if let Some(lat) = lat {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidInput("lat must be between -90 and 90".into()));
        }
    }
    if let Some(lon) = lon {
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(Error::InvalidInput("lon must be between -180 and 180".into()));
        }
    }
    Ok(())
}
