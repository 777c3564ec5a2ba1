//! Map markers and presence decay.

use crate::models::NodeSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Half-life of a marker's weight: 90 minutes.
pub const HALF_LIFE_MS: f64 = 90.0 * 60.0 * 1000.0;

/// Rows returned by the map feed.
pub const MAX_MAP_NODES: usize = 500;

/// `exp(-ln2 * age / half_life)`, clamped to `[0, 1]`.
///
/// Negative ages (clock drift) weigh 1.
pub fn presence_weight(age_ms: f64, half_life_ms: f64) -> f64 {
    if !age_ms.is_finite() || !half_life_ms.is_finite() || half_life_ms <= 0.0 {
        return 0.0;
    }
    if age_ms <= 0.0 {
        return 1.0;
    }
    (-std::f64::consts::LN_2 * age_ms / half_life_ms).exp().clamp(0.0, 1.0)
}

/// A node as the map renders it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MapMarker {
    pub node_id: String,
    pub last_seen: DateTime<Utc>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub weight: f64,
}

impl MapMarker {
    pub fn from_summary(summary: &NodeSummary, now: DateTime<Utc>) -> Self {
        let age_ms = (now - summary.last_seen).num_milliseconds() as f64;
        Self {
            node_id: summary.node_id.clone(),
            last_seen: summary.last_seen,
            lat: summary.lat,
            lon: summary.lon,
            weight: presence_weight(age_ms, HALF_LIFE_MS),
        }
    }
}
