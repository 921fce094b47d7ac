//! Content items and access decisions.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tiers::Tier;

/// A gated piece of creator content, as supplied by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub creator_id: String,
    pub is_locked: bool,
    #[serde(default)]
    pub min_required_tier: Option<Tier>,
    /// Explicit unit price in base units; a positive price gates by purchase.
    #[serde(default)]
    pub price: Option<U256>,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Old-style "premium post" flag, honoured when no tier is set.
    #[serde(default)]
    pub legacy_premium: bool,
}

fn default_currency() -> String {
    "ETH".to_string()
}

impl ContentItem {
    /// Tier the item demands; `None` means any active subscription.
    pub fn required_tier(&self) -> Option<Tier> {
        self.min_required_tier
            .or(if self.legacy_premium { Some(Tier::Vip) } else { None })
    }

    /// Positive explicit price, if the item is sold individually.
    pub fn purchase_price(&self) -> Option<U256> {
        self.price.filter(|p| !p.is_zero())
    }
}

/// Why access was granted or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessReason {
    Unlocked,
    Creator,
    Subscribed,
    Purchased,
    NotSubscribed,
    InsufficientTier,
    PurchaseRequired,
    ContentNotFound,
    EvaluationError,
}

impl AccessReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessReason::Unlocked => "unlocked",
            AccessReason::Creator => "creator",
            AccessReason::Subscribed => "subscribed",
            AccessReason::Purchased => "purchased",
            AccessReason::NotSubscribed => "not_subscribed",
            AccessReason::InsufficientTier => "insufficient_tier",
            AccessReason::PurchaseRequired => "purchase_required",
            AccessReason::ContentNotFound => "content_not_found",
            AccessReason::EvaluationError => "evaluation_error",
        }
    }
}

/// Result of `evaluate_access`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: AccessReason,
    /// What the viewer would pay to unlock, after any effective flash sale.
    pub effective_price: Option<U256>,
    /// `effective_price` converted at the cached exchange rate.
    pub display_price: Option<f64>,
    pub required_tier: Option<Tier>,
    pub viewer_tier: Option<Tier>,
    pub flash_sale_id: Option<Uuid>,
}

impl AccessDecision {
    pub fn allow(reason: AccessReason) -> Self {
        Self {
            allowed: true,
            reason,
            effective_price: None,
            display_price: None,
            required_tier: None,
            viewer_tier: None,
            flash_sale_id: None,
        }
    }

    pub fn deny(reason: AccessReason) -> Self {
        Self {
            allowed: false,
            ..Self::allow(reason)
        }
    }
}
