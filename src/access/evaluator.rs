//! The read path: may this viewer see this content item right now.

use alloy::primitives::utils::format_ether;
use alloy::primitives::U256;
use std::sync::Arc;

use crate::access::content::ContentDirectory;
use crate::access::types::{AccessDecision, AccessReason, ContentItem};
use crate::clock::SharedClock;
use crate::error::EngineResult;
use crate::flash_sales::{effective_price, FlashSale, FlashSaleEngine};
use crate::observability::metrics;
use crate::pricing::PriceCache;
use crate::purchases::PurchaseBook;
use crate::subscriptions::SubscriptionLedger;
use crate::tiers::{meets, Tier, TierCatalog};

/// Composes subscriptions, purchases, flash sales and tier data into an
/// allow/deny decision. Reads only; no network I/O beyond the cached rate.
pub struct AccessControlEvaluator {
    content: Arc<dyn ContentDirectory>,
    subscriptions: Arc<SubscriptionLedger>,
    sales: Arc<FlashSaleEngine>,
    purchases: Arc<PurchaseBook>,
    catalog: Arc<TierCatalog>,
    prices: PriceCache,
    clock: SharedClock,
}

impl AccessControlEvaluator {
    pub fn new(
        content: Arc<dyn ContentDirectory>,
        subscriptions: Arc<SubscriptionLedger>,
        sales: Arc<FlashSaleEngine>,
        purchases: Arc<PurchaseBook>,
        catalog: Arc<TierCatalog>,
        prices: PriceCache,
        clock: SharedClock,
    ) -> Self {
        Self {
            content,
            subscriptions,
            sales,
            purchases,
            catalog,
            prices,
            clock,
        }
    }

    /// Single entry point for gated content. Fails closed: any internal error
    /// is a denial with `EvaluationError`.
    pub fn evaluate_access(&self, viewer_id: Option<&str>, content_item_id: &str) -> AccessDecision {
        let viewer_id = viewer_id.map(str::trim).filter(|v| !v.is_empty());
        let decision = match self.decide(viewer_id, content_item_id) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    content_item = content_item_id,
                    viewer = ?viewer_id,
                    error = %e,
                    "Access evaluation failed, denying"
                );
                AccessDecision::deny(AccessReason::EvaluationError)
            }
        };

        metrics::record_access_decision(decision.allowed, decision.reason.as_str());
        decision
    }

    fn decide(&self, viewer_id: Option<&str>, content_item_id: &str) -> EngineResult<AccessDecision> {
        let Some(item) = self.content.content_item(content_item_id)? else {
            return Ok(AccessDecision::deny(AccessReason::ContentNotFound));
        };

        if viewer_id == Some(item.creator_id.as_str()) {
            return Ok(AccessDecision::allow(AccessReason::Creator));
        }
        if !item.is_locked {
            return Ok(AccessDecision::allow(AccessReason::Unlocked));
        }

        let viewer_tier = viewer_id.and_then(|v| self.subscriptions.entitlement(v, &item.creator_id));

        if let Some(price) = item.purchase_price() {
            return Ok(self.decide_purchase(viewer_id, &item, price, viewer_tier));
        }

        let required = item.required_tier();
        let mut decision = match viewer_tier {
            Some(tier) if meets(tier, required) => AccessDecision::allow(AccessReason::Subscribed),
            Some(_) => {
                let mut denied = AccessDecision::deny(AccessReason::InsufficientTier);
                self.quote_tier(&mut denied, &item, required.unwrap_or(Tier::Free));
                denied
            }
            None => {
                let mut denied = AccessDecision::deny(AccessReason::NotSubscribed);
                self.quote_tier(&mut denied, &item, required.unwrap_or(Tier::Free));
                denied
            }
        };
        decision.required_tier = required;
        decision.viewer_tier = viewer_tier;
        Ok(decision)
    }

    fn decide_purchase(
        &self,
        viewer_id: Option<&str>,
        item: &ContentItem,
        price: U256,
        viewer_tier: Option<Tier>,
    ) -> AccessDecision {
        let purchased = viewer_id.is_some_and(|v| self.purchases.has_purchased(v, &item.id));
        let mut decision = if purchased {
            AccessDecision::allow(AccessReason::Purchased)
        } else {
            let sale = self.sales.best_sale_for_content(&item.creator_id, &item.id);
            let mut denied = AccessDecision::deny(AccessReason::PurchaseRequired);
            self.quote(&mut denied, sale.as_ref(), price);
            denied
        };
        decision.viewer_tier = viewer_tier;
        decision
    }

    fn quote_tier(&self, decision: &mut AccessDecision, item: &ContentItem, tier: Tier) {
        let sale = self.sales.best_sale_for_tier(&item.creator_id, tier);
        self.quote(decision, sale.as_ref(), self.catalog.default_price(tier));
    }

    fn quote(&self, decision: &mut AccessDecision, sale: Option<&FlashSale>, base: U256) {
        let price = effective_price(sale, base, self.clock.now());
        decision.effective_price = Some(price);
        decision.display_price = format_ether(price)
            .parse::<f64>()
            .ok()
            .map(|units| units * self.prices.peek_rate());
        decision.flash_sale_id = sale.map(|s| s.id);
    }
}
