//! Flash sale and redemption records.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payments::types::{PaymentState, PaymentStatus, SettlementTarget};
use crate::tiers::Tier;

/// What a sale discounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaleScope {
    /// The creator's subscription; `None` covers every tier.
    Subscription {
        #[serde(default)]
        tier: Option<Tier>,
    },
    /// One content item sold individually.
    ContentItem { content_item_id: String },
}

impl SaleScope {
    /// Two scopes compete when a buyer could apply either one to the same price.
    pub fn overlaps(&self, other: &SaleScope) -> bool {
        match (self, other) {
            (SaleScope::Subscription { tier: a }, SaleScope::Subscription { tier: b }) => {
                a.is_none() || b.is_none() || a == b
            }
            (
                SaleScope::ContentItem { content_item_id: a },
                SaleScope::ContentItem { content_item_id: b },
            ) => a == b,
            _ => false,
        }
    }
}

/// Input to `FlashSaleEngine::create_sale`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleConfig {
    pub creator_id: String,
    pub scope: SaleScope,
    /// Whole percent, `1..=100`.
    pub discount_percent: u8,
    pub start_at: u64,
    pub end_at: u64,
    /// `None` means unlimited; `Some(0)` is rejected.
    #[serde(default)]
    pub max_redemptions: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
}

/// A time-boxed discount campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashSale {
    pub id: Uuid,
    pub creator_id: String,
    pub scope: SaleScope,
    pub discount_percent: u8,
    pub start_at: u64,
    pub end_at: u64,
    pub max_redemptions: Option<u32>,
    pub is_active: bool,
    pub title: Option<String>,
    pub created_at: u64,
}

impl FlashSale {
    /// Active and `now` inside `[start_at, end_at)`.
    pub fn is_effective(&self, now: u64) -> bool {
        self.is_active && self.start_at <= now && now < self.end_at
    }

    pub fn covers_content(&self, content_item_id: &str) -> bool {
        matches!(&self.scope, SaleScope::ContentItem { content_item_id: id } if id == content_item_id)
    }

    pub fn covers_tier(&self, tier: Tier) -> bool {
        match self.scope {
            SaleScope::Subscription { tier: None } => true,
            SaleScope::Subscription { tier: Some(t) } => t == tier,
            SaleScope::ContentItem { .. } => false,
        }
    }
}

/// One user's claim on one sale slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub sale_id: Uuid,
    pub user_id: String,
    pub redeemed_at: u64,
    /// Discount locked in at redemption time.
    pub discount_percent: u8,
    /// Price the discount was taken off, in base units.
    #[serde(default)]
    pub original_price: U256,
    /// What the user owes; a settling transfer must cover it.
    #[serde(default)]
    pub final_price: U256,
    /// Subscription or purchase this redemption priced. Such rows settle
    /// and expire together with that record.
    #[serde(default)]
    pub applied_to: Option<SettlementTarget>,
    pub payment: PaymentState,
}

impl Redemption {
    pub fn payment_status(&self) -> PaymentStatus {
        self.payment.status
    }

    /// PENDING and COMPLETED rows hold a slot; FAILED rows released theirs.
    pub fn holds_slot(&self) -> bool {
        self.payment.status != PaymentStatus::Failed
    }

    pub fn discount_amount(&self) -> U256 {
        self.original_price.saturating_sub(self.final_price)
    }
}

/// Selector for `list_effective_sales_for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleLookup<'a> {
    Creator(&'a str),
    ContentItem(&'a str),
}

/// A sale with its remaining capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleListing {
    #[serde(flatten)]
    pub sale: FlashSale,
    /// `None` for unlimited sales.
    pub remaining: Option<u32>,
}

/// Read-only answer to "could this user redeem, and at what price".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedemptionPreview {
    pub sale_id: Uuid,
    pub eligible: bool,
    /// Why the redemption would be rejected.
    pub blocked_by: Option<String>,
    pub original_price: U256,
    pub discounted_price: U256,
    pub remaining: Option<u32>,
}
