//! Node summary and credential models.

use aesc_sign::Credential;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest sighting of a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSummary {
    pub node_id: String,
    pub last_seen: DateTime<Utc>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl NodeSummary {
    /// Fold a newer sighting into this summary.
    ///
    /// Older sightings are ignored. A sighting without coordinates keeps
    /// the last known position. Returns whether anything changed.
    pub fn observe(&mut self, seen: DateTime<Utc>, lat: Option<f64>, lon: Option<f64>) -> bool {
        if seen < self.last_seen {
            return false;
        }
        self.last_seen = seen;
        if let (Some(lat), Some(lon)) = (lat, lon) {
            self.lat = Some(lat);
            self.lon = Some(lon);
        }
        true
    }
}

/// A node's registered verification key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeCredential {
    pub node_id: String,
    pub credential: Credential,
    pub created_at: DateTime<Utc>,
}
