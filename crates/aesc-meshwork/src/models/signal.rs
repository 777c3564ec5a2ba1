//! Signal model - a node's free-text and media post.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted signal text, in characters.
pub const MAX_SIGNAL_CONTENT_CHARS: usize = 2_000;

/// A post attached to a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Blake3 hex of node, timestamp, nonce and content
    pub id: String,

    pub node_id: String,

    pub content: Option<String>,

    /// Public URL of uploaded media
    pub media_url: Option<String>,

    pub ts: DateTime<Utc>,

    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Signal {
    /// Generate ID from content hash.
    pub fn generate_id(node_id: &str, ts_ms: i64, nonce: &str, content: Option<&str>) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(node_id.as_bytes());
        hasher.update(b"|");
        hasher.update(ts_ms.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(nonce.as_bytes());
        hasher.update(b"|");
        hasher.update(content.unwrap_or("").as_bytes());
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }

    /// Key of the record itself.
    pub fn record_key(id: &str) -> String {
        format!("signal:{id}")
    }

    /// Per-node index key; newest first under a prefix scan.
    pub fn node_index_key(&self) -> String {
        format!("signal_idx:{}:{}:{}", self.node_id, reverse_ts(&self.ts), self.id)
    }

    /// Global index key; newest first under a prefix scan.
    pub fn global_index_key(&self) -> String {
        format!("signal_all:{}:{}", reverse_ts(&self.ts), self.id)
    }
}

/// Zero-padded `u64::MAX - ts_ms`, so ascending keys are descending times.
fn reverse_ts(ts: &DateTime<Utc>) -> String {
    let ms = u64::try_from(ts.timestamp_millis()).unwrap_or(0);
    format!("{:020}", u64::MAX - ms)
}
