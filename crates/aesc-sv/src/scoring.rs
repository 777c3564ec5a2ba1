//! Accrual scoring.

use crate::error::{Error, Result};
use crate::tier::Tier;
use serde::{Deserialize, Serialize};

/// Streak days beyond this add no further bonus.
pub const STREAK_BONUS_CAP_DAYS: u32 = 30;

/// Bonus per streak day (1%).
const STREAK_BONUS_PER_DAY: f64 = 0.01;

/// Largest weight a single accrual accepts.
pub const MAX_WEIGHT: f64 = 1_000_000.0;

/// Activity that earns SV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Ping,
    Checkin,
    Post,
    Ritual,
    /// Reserved for future debits; scores zero.
    Boost,
}

impl ActivityKind {
    /// Base SV per unit weight.
    pub const fn base(self) -> f64 {
        match self {
            ActivityKind::Ping => 0.8,
            ActivityKind::Checkin => 1.5,
            ActivityKind::Post => 2.0,
            ActivityKind::Ritual => 3.5,
            ActivityKind::Boost => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Ping => "ping",
            ActivityKind::Checkin => "checkin",
            ActivityKind::Post => "post",
            ActivityKind::Ritual => "ritual",
            ActivityKind::Boost => "boost",
        }
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ping" => Ok(ActivityKind::Ping),
            "checkin" => Ok(ActivityKind::Checkin),
            "post" => Ok(ActivityKind::Post),
            "ritual" => Ok(ActivityKind::Ritual),
            "boost" => Ok(ActivityKind::Boost),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// Streak multiplier: `1 + min(streak, 30) * 0.01`.
pub fn streak_factor(streak_days: u32) -> f64 {
    1.0 + f64::from(streak_days.min(STREAK_BONUS_CAP_DAYS)) * STREAK_BONUS_PER_DAY
}

/// SV earned by one activity.
///
/// `base(kind) * weight * streak_factor(streak_days) * tier.multiplier()`
pub fn accrual_delta(kind: ActivityKind, weight: f64, streak_days: u32, tier: Tier) -> Result<f64> {
    if !weight.is_finite() || !(0.0..=MAX_WEIGHT).contains(&weight) {
        return Err(Error::InvalidWeight(weight));
    }
    let delta = kind.base() * weight * streak_factor(streak_days) * tier.multiplier();
    if !delta.is_finite() {
        return Err(Error::InvalidWeight(weight));
    }
    Ok(delta)
}
