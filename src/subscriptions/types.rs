//! Subscription records.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payments::types::{PaymentState, PaymentStatus};
use crate::tiers::Tier;

/// Unique key of a subscription row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub subscriber_id: String,
    pub creator_id: String,
}

impl SubscriptionKey {
    pub fn new(subscriber_id: &str, creator_id: &str) -> Self {
        Self {
            subscriber_id: subscriber_id.to_string(),
            creator_id: creator_id.to_string(),
        }
    }
}

/// One subscriber's subscription to one creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub subscriber_id: String,
    pub creator_id: String,
    pub tier: Tier,
    /// Price in base units of `currency`.
    pub price_at_purchase: U256,
    pub currency: String,
    /// Seconds since epoch.
    pub subscribed_at: u64,
    /// Seconds since epoch; access ends strictly before this instant.
    pub valid_until: u64,
    /// Cleared by cancellation, independent of `valid_until`.
    pub is_active: bool,
    /// Bumped on every renewal of the row; proofs bind to one cycle.
    #[serde(default)]
    pub billing_cycle: u32,
    /// Sale whose redemption priced this cycle, settled together with it.
    #[serde(default)]
    pub flash_sale_id: Option<Uuid>,
    pub payment: PaymentState,
}

impl Subscription {
    /// The access invariant: active flag, unexpired, and paid. All three are
    /// required; none implies another.
    pub fn grants_access(&self, now: u64) -> bool {
        self.is_active && self.valid_until > now && self.payment.status == PaymentStatus::Completed
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment.status
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(&self.subscriber_id, &self.creator_id)
    }
}

/// Counts reported to admin tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub entitled: usize,
    pub pending: usize,
    pub failed: usize,
    pub lapsed: usize,
}
