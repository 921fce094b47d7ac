//! Tier ordering and default pricing.

use alloy::primitives::utils::parse_ether;
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::TierConfig;
use crate::error::{EngineError, EngineResult};

/// Subscription level. Compare with [`Tier::rank`], never by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Premium,
    Vip,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Basic, Tier::Premium, Tier::Vip];

    /// Position in the total order, `free = 1 .. vip = 4`.
    pub fn rank(self) -> u8 {
        match self {
            Tier::Free => 1,
            Tier::Basic => 2,
            Tier::Premium => 3,
            Tier::Vip => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Vip => "vip",
        }
    }

    /// `true` when this tier is at least `required`.
    pub fn meets(self, required: Tier) -> bool {
        self.rank() >= required.rank()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "premium" => Ok(Tier::Premium),
            "vip" => Ok(Tier::Vip),
            other => Err(EngineError::validation(format!(
                "unknown tier '{}', expected one of free, basic, premium, vip",
                other
            ))),
        }
    }
}

/// Rank a content requirement demands. No explicit tier means "any active
/// subscription", which is rank 0: every tier, including `free`, satisfies it,
/// but a viewer with no subscription at all still does not.
pub fn required_rank(required: Option<Tier>) -> u8 {
    required.map(Tier::rank).unwrap_or(0)
}

/// `meets(userTier, requiredTier)` with an optional requirement.
pub fn meets(user: Tier, required: Option<Tier>) -> bool {
    user.rank() >= required_rank(required)
}

/// Immutable tier price list plus the subscription period.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    prices: [U256; 4],
    period_secs: u64,
    currency: String,
}

impl TierCatalog {
    /// Build from configuration, parsing decimal amounts into base units.
    pub fn from_config(config: &TierConfig) -> EngineResult<Self> {
        let parse = |tier: Tier, value: &str| {
            parse_ether(value).map_err(|e| {
                EngineError::validation(format!("invalid price '{}' for tier {}: {}", value, tier, e))
            })
        };

        Ok(Self {
            prices: [
                parse(Tier::Free, &config.prices.free)?,
                parse(Tier::Basic, &config.prices.basic)?,
                parse(Tier::Premium, &config.prices.premium)?,
                parse(Tier::Vip, &config.prices.vip)?,
            ],
            period_secs: config.period_days * 24 * 3600,
            currency: config.currency.clone(),
        })
    }

    pub fn default_price(&self, tier: Tier) -> U256 {
        self.prices[usize::from(tier.rank() - 1)]
    }

    /// Price difference when moving between tiers; zero for downgrades.
    pub fn upgrade_price(&self, from: Tier, to: Tier) -> U256 {
        self.default_price(to).saturating_sub(self.default_price(from))
    }

    pub fn period_secs(&self) -> u64 {
        self.period_secs
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

impl Default for TierCatalog {
    fn default() -> Self {
        Self {
            prices: [
                U256::ZERO,
                U256::from(50_000_000_000_000_000u64),  // 0.05
                U256::from(150_000_000_000_000_000u64), // 0.15
                U256::from(350_000_000_000_000_000u64), // 0.35
            ],
            period_secs: 30 * 24 * 3600,
            currency: "ETH".to_string(),
        }
    }
}
