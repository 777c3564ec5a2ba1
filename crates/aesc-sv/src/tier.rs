//! Balance tiers.

use serde::{Deserialize, Serialize};

/// A named SV balance bracket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[default]
    Seed,
    Grove,
    Sanctum,
    Aether,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 4] = [Tier::Seed, Tier::Grove, Tier::Sanctum, Tier::Aether];

    /// Minimum balance for this tier.
    pub const fn threshold(self) -> f64 {
        match self {
            Tier::Seed => 0.0,
            Tier::Grove => 3_000.0,
            Tier::Sanctum => 15_000.0,
            Tier::Aether => 50_000.0,
        }
    }

    /// Accrual multiplier granted by this tier.
    pub const fn multiplier(self) -> f64 {
        match self {
            Tier::Seed => 1.0,
            Tier::Grove => 1.15,
            Tier::Sanctum => 1.35,
            Tier::Aether => 1.6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Seed => "Seed",
            Tier::Grove => "Grove",
            Tier::Sanctum => "Sanctum",
            Tier::Aether => "Aether",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier for a balance. Pure and deterministic.
pub fn tier_for(balance: f64) -> Tier {
    Tier::ALL
        .iter()
        .rev()
        .copied()
        .find(|tier| balance >= tier.threshold())
        .unwrap_or(Tier::Seed)
}
