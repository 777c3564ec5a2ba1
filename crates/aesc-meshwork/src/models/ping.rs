//! Stored ping model.

use crate::error::{Error, Result};
use aesc_sign::SignedPing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A presence claim as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredPing {
    pub node_id: String,
    pub sticker_id: Option<String>,
    pub ts: DateTime<Utc>,
    pub nonce: String,
    pub sig: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// False only for pings accepted under the advisory policy
    pub verified: bool,
    pub received_at: DateTime<Utc>,
}

impl StoredPing {
    /// Convert a wire ping, coercing `ts` to a date and nulling an empty sticker.
    pub fn from_signed(ping: &SignedPing, verified: bool, received_at: DateTime<Utc>) -> Result<Self> {
        let ts = DateTime::<Utc>::from_timestamp_millis(ping.ts)
            .ok_or_else(|| Error::InvalidInput("ts out of range".into()))?;
        Ok(Self {
            node_id: ping.node_id.clone(),
            sticker_id: ping.sticker_id.clone().filter(|s| !s.is_empty()),
            ts,
            nonce: ping.nonce.clone(),
            sig: ping.sig.clone(),
            lat: ping.lat,
            lon: ping.lon,
            verified,
            received_at,
        })
    }

    /// Time-ordered storage key: `ping:{ts_ms:020}:{node_id}:{nonce}`.
    pub fn storage_key(&self) -> String {
        format!(
            "ping:{:020}:{}:{}",
            self.ts.timestamp_millis().max(0),
            self.node_id,
            self.nonce
        )
    }
}
