//! Per-node SV state.

use crate::error::{Error, Result};
use crate::tier::{tier_for, Tier};
use serde::{Deserialize, Serialize};

/// Streak length cap.
pub const MAX_STREAK_DAYS: u32 = 365;

/// Ledger row for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvState {
    pub node_id: String,

    /// Claimed SV
    pub balance: f64,

    /// Accrued but not yet claimed
    pub unclaimed: f64,

    /// Unix ms of the last non-empty claim
    pub last_claim_ts: Option<i64>,

    pub streak_days: u32,

    /// Always `tier_for(balance)`
    pub tier: Tier,

    /// Unix ms of the last write
    pub updated_at: i64,

    /// Write counter; the compare-and-swap token
    #[serde(default)]
    pub revision: u64,
}

impl SvState {
    /// All-zero state for a node seen for the first time.
    pub fn new(node_id: impl Into<String>, now: i64) -> Self {
        Self {
            node_id: node_id.into(),
            balance: 0.0,
            unclaimed: 0.0,
            last_claim_ts: None,
            streak_days: 0,
            tier: Tier::Seed,
            updated_at: now,
            revision: 0,
        }
    }

    /// Add `delta` to `unclaimed`. The row is untouched if the sum would
    /// not be finite.
    pub(crate) fn apply_accrual(&mut self, delta: f64) -> Result<()> {
        let unclaimed = self.unclaimed + delta;
        if !unclaimed.is_finite() {
            return Err(Error::Overflow(self.node_id.clone()));
        }
        self.unclaimed = unclaimed;
        Ok(())
    }

    /// Move all unclaimed SV into the balance. Returns false if there was
    /// nothing to claim.
    pub(crate) fn apply_claim(&mut self, now: i64) -> Result<bool> {
        if self.unclaimed <= 0.0 {
            return Ok(false);
        }
        let balance = self.balance + self.unclaimed;
        if !balance.is_finite() {
            return Err(Error::Overflow(self.node_id.clone()));
        }
        self.balance = balance;
        self.unclaimed = 0.0;
        self.tier = tier_for(self.balance);
        self.last_claim_ts = Some(now);
        Ok(true)
    }

    pub(crate) fn apply_streak(&mut self, by: u32) {
        self.streak_days = self.streak_days.saturating_add(by).min(MAX_STREAK_DAYS);
    }
}
