//! Fee split of a settled payment between creator, platform and referrer.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::config::FeeConfig;

const BPS_DENOMINATOR: u64 = 10_000;

/// Amounts owed to each party, summing to the settled total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub creator: U256,
    pub platform: U256,
    pub referrer: U256,
}

#[derive(Debug, Clone, Copy)]
pub struct FeePolicy {
    platform_bps: u16,
    platform_with_referrer_bps: u16,
    referrer_bps: u16,
}

impl From<&FeeConfig> for FeePolicy {
    fn from(config: &FeeConfig) -> Self {
        Self {
            platform_bps: config.platform_bps,
            platform_with_referrer_bps: config.platform_with_referrer_bps,
            referrer_bps: config.referrer_bps,
        }
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::from(&FeeConfig::default())
    }
}

impl FeePolicy {
    /// Platform and referrer shares round down; the creator gets the rest.
    pub fn split(&self, total: U256, has_referrer: bool) -> FeeSplit {
        let share = |bps: u16| total * U256::from(bps) / U256::from(BPS_DENOMINATOR);

        let (platform, referrer) = if has_referrer {
            (share(self.platform_with_referrer_bps), share(self.referrer_bps))
        } else {
            (share(self.platform_bps), U256::ZERO)
        };

        FeeSplit {
            creator: total - platform - referrer,
            platform,
            referrer,
        }
    }
}
