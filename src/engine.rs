//! Composition root.
//!
//! Builds every component from an [`EngineConfig`] and wires the shared
//! handles together. Also hosts the few operations that span components
//! (catalog-priced subscribe, content purchase, applying a sale,
//! "check my payment").
//!
//! A sale discount is only ever granted together with a claimed sale slot:
//! subscribe and purchase claim the best sale that still has room and price
//! the record at the redemption's locked-in price.

use alloy::primitives::U256;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::{AccessControlEvaluator, ContentDirectory as _, ContentItem, InMemoryContent};
use crate::blockchain::{BlockchainClient, EvmLedger, PaymentLedger, UnavailableLedger};
use crate::clock::SharedClock;
use crate::config::{BlockchainConfig, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::flash_sales::{FlashSale, FlashSaleEngine, Redemption, SaleRules, SaleScope};
use crate::payments::monitor::{self, PaymentMonitor, SettlementQueue};
use crate::payments::{
    CreatorPayee, FeePolicy, PayeeRegistry, PaymentReconciler, PaymentState, PaymentStatus,
    ProofAuditLog, SettlementRequest, SettlementTarget,
};
use crate::pricing::{CacheSettings, PriceCache, PriceStatus, RateSource};
use crate::purchases::{Purchase, PurchaseBook, PurchaseOrder};
use crate::storage::snapshot::{EngineSnapshot, SNAPSHOT_VERSION};
use crate::subscriptions::{LedgerSummary, Subscription, SubscriptionLedger};
use crate::tiers::{Tier, TierCatalog};

/// Point-in-time view for admin tooling.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub ledger: &'static str,
    pub subscriptions: LedgerSummary,
    pub active_sales: usize,
    pub content_items: usize,
    pub payees: usize,
    pub audit_entries: usize,
    pub price: PriceStatus,
}

/// A redemption and the record it priced.
#[derive(Debug, Clone, Serialize)]
pub struct SaleApplication {
    pub redemption: Redemption,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase: Option<Purchase>,
}

/// Every component, shared by the HTTP handlers and background tasks.
pub struct Engine {
    pub catalog: Arc<TierCatalog>,
    pub subscriptions: Arc<SubscriptionLedger>,
    pub sales: Arc<FlashSaleEngine>,
    pub purchases: Arc<PurchaseBook>,
    pub content: Arc<InMemoryContent>,
    pub payees: Arc<PayeeRegistry>,
    pub audit: Arc<ProofAuditLog>,
    pub reconciler: Arc<PaymentReconciler>,
    pub prices: PriceCache,
    pub evaluator: Arc<AccessControlEvaluator>,
    pub settlements: SettlementQueue,
    ledger_name: &'static str,
    clock: SharedClock,
}

impl Engine {
    /// Build the engine. The returned monitor must be spawned for queued
    /// settlements and the stale-pending sweep to run.
    pub fn build(
        config: &EngineConfig,
        clock: SharedClock,
        ledger: Arc<dyn PaymentLedger>,
        rate_source: Arc<dyn RateSource>,
    ) -> EngineResult<(Self, PaymentMonitor)> {
        let catalog = Arc::new(TierCatalog::from_config(&config.tiers)?);
        let subscriptions = Arc::new(SubscriptionLedger::new(clock.clone(), catalog.period_secs()));
        let sales = Arc::new(FlashSaleEngine::new(
            clock.clone(),
            SaleRules::from(&config.flash_sales),
        ));
        let purchases = Arc::new(PurchaseBook::new(clock.clone()));
        let content = Arc::new(InMemoryContent::new());
        let payees = Arc::new(PayeeRegistry::new());
        let audit = Arc::new(ProofAuditLog::new());
        let prices = PriceCache::new(
            rate_source,
            clock.clone(),
            CacheSettings::from(&config.pricing),
        );

        let ledger_name = ledger.name();
        let reconciler = Arc::new(PaymentReconciler::new(
            ledger,
            subscriptions.clone(),
            sales.clone(),
            purchases.clone(),
            payees.clone(),
            audit.clone(),
            FeePolicy::from(&config.reconciler.fees),
            (&config.reconciler).into(),
            clock.clone(),
        ));
        let (settlements, monitor) =
            monitor::channel(reconciler.clone(), &config.reconciler, clock.clone());

        let evaluator = Arc::new(AccessControlEvaluator::new(
            content.clone(),
            subscriptions.clone(),
            sales.clone(),
            purchases.clone(),
            catalog.clone(),
            prices.clone(),
            clock.clone(),
        ));

        tracing::info!(
            ledger = ledger_name,
            period_secs = catalog.period_secs(),
            currency = catalog.currency(),
            platform_wallet = ?config.reconciler.platform_wallet,
            "Engine assembled"
        );

        Ok((
            Self {
                catalog,
                subscriptions,
                sales,
                purchases,
                content,
                payees,
                audit,
                reconciler,
                prices,
                evaluator,
                settlements,
                ledger_name,
                clock,
            },
            monitor,
        ))
    }

    /// Subscribe at the catalog price, discounted by the best tier sale
    /// that still has a slot for the subscriber.
    pub fn subscribe(&self, subscriber_id: &str, creator_id: &str, tier: Tier) -> EngineResult<Subscription> {
        self.release_unpaid_subscription_claim(subscriber_id, creator_id);
        let base = self.catalog.default_price(tier);
        let claim = self.claim_best(subscriber_id, self.sales.sales_for_tier(creator_id, tier), base);
        self.open_subscription(subscriber_id, creator_id, tier, base, claim)
    }

    /// Open a purchase of a priced content item, discounted by the best item
    /// sale that still has a slot for the buyer.
    pub fn purchase(&self, buyer_id: &str, content_item_id: &str) -> EngineResult<Purchase> {
        let (item, base) = self.priced_item(buyer_id, content_item_id)?;
        if let Some(existing) = self.purchases.find(buyer_id, &item.id) {
            match existing.payment_status() {
                PaymentStatus::Completed => return Err(EngineError::AlreadyPurchased),
                PaymentStatus::Pending => return Ok(existing),
                PaymentStatus::Failed => {}
            }
        }
        let claim = self.claim_best(
            buyer_id,
            self.sales.sales_for_content(&item.creator_id, &item.id),
            base,
        );
        self.open_purchase(buyer_id, &item, base, claim)
    }

    /// Redeem one specific sale and open the record it discounts. Unlike
    /// [`subscribe`](Self::subscribe), a sale that cannot be claimed is an
    /// error rather than a fallback to full price.
    ///
    /// `tier` is required for sales covering every tier and must match a
    /// tier-scoped sale.
    pub fn apply_sale(&self, sale_id: Uuid, user_id: &str, tier: Option<Tier>) -> EngineResult<SaleApplication> {
        let sale = self
            .sales
            .get_sale(sale_id)
            .ok_or_else(|| EngineError::not_found("flash sale", sale_id))?;

        match &sale.scope {
            SaleScope::Subscription { tier: scoped } => {
                let tier = match (*scoped, tier) {
                    (Some(scoped), Some(requested)) if scoped != requested => {
                        return Err(EngineError::validation(format!(
                            "sale covers the {} tier, not {}",
                            scoped, requested
                        )))
                    }
                    (Some(scoped), _) => scoped,
                    (None, Some(requested)) => requested,
                    (None, None) => {
                        return Err(EngineError::validation(
                            "tier is required for sales covering every tier",
                        ))
                    }
                };
                let base = self.catalog.default_price(tier);
                let redemption = self.sales.redeem(sale_id, user_id, base)?;
                self.release_unpaid_subscription_claim(user_id, &sale.creator_id);
                let subscription =
                    self.open_subscription(user_id, &sale.creator_id, tier, base, Some(redemption))?;
                Ok(SaleApplication {
                    redemption: self.applied_redemption(sale_id, user_id)?,
                    subscription: Some(subscription),
                    purchase: None,
                })
            }
            SaleScope::ContentItem { content_item_id } => {
                let (item, base) = self.priced_item(user_id, content_item_id)?;
                if item.creator_id != sale.creator_id {
                    return Err(EngineError::validation("sale and content item belong to different creators"));
                }
                match self.purchases.find(user_id, &item.id).map(|p| p.payment_status()) {
                    Some(PaymentStatus::Completed) => return Err(EngineError::AlreadyPurchased),
                    Some(PaymentStatus::Pending) => {
                        return Err(EngineError::validation(
                            "a purchase of this item is already awaiting payment",
                        ))
                    }
                    _ => {}
                }
                let redemption = self.sales.redeem(sale_id, user_id, base)?;
                let purchase = self.open_purchase(user_id, &item, base, Some(redemption))?;
                if purchase.flash_sale_id != Some(sale_id) {
                    return Err(EngineError::validation(
                        "a purchase of this item is already awaiting payment",
                    ));
                }
                Ok(SaleApplication {
                    redemption: self.applied_redemption(sale_id, user_id)?,
                    subscription: None,
                    purchase: Some(purchase),
                })
            }
        }
    }

    /// Cancel a subscription on behalf of its subscriber.
    pub fn cancel_subscription(&self, user_id: &str, id: Uuid) -> EngineResult<Subscription> {
        self.require_owner(user_id, &SettlementTarget::Subscription { subscription_id: id })?;
        self.subscriptions.cancel(id)
    }

    /// "Check my payment": queue a verification if the record is still
    /// PENDING and return its current state without waiting.
    ///
    /// Only the record's owner may submit a proof for it. The proof is
    /// stored in its canonical spelling.
    pub fn check_payment(&self, user_id: &str, request: SettlementRequest) -> EngineResult<PaymentState> {
        let proof_ref = self.reconciler.canonical_proof_ref(&request.proof_ref)?;
        self.require_owner(user_id, &request.target)?;
        let state = self.reconciler.payment_state(&request.target)?;
        if state.status == PaymentStatus::Pending {
            // Surfaces a missing payee now instead of in the background.
            self.reconciler.expectation(&request)?;
            tracing::debug!(
                record = %request.target,
                proof_ref = %proof_ref,
                "Queued payment check"
            );
            self.settlements.submit(SettlementRequest { proof_ref, ..request })?;
        }
        Ok(state)
    }

    /// Fails with `Forbidden` unless `user_id` owns the record.
    pub fn require_owner(&self, user_id: &str, target: &SettlementTarget) -> EngineResult<()> {
        let owner = self.reconciler.owner_of(target)?;
        if owner != user_id {
            tracing::warn!(record = %target, user = user_id, "Rejected access to another user's record");
            return Err(EngineError::forbidden(format!("{} belongs to another user", target)));
        }
        Ok(())
    }

    pub fn register_payee(&self, payee: CreatorPayee) -> EngineResult<()> {
        self.payees.register(payee)
    }

    /// Claim the first sale in `candidates` that still accepts the user.
    fn claim_best(&self, user_id: &str, candidates: Vec<FlashSale>, base: U256) -> Option<Redemption> {
        candidates.into_iter().find_map(|sale| {
            match self.sales.redeem(sale.id, user_id, base) {
                Ok(redemption) => Some(redemption),
                Err(e) => {
                    tracing::debug!(sale_id = %sale.id, user = user_id, error = %e, "Sale not claimed");
                    None
                }
            }
        })
    }

    fn open_subscription(
        &self,
        subscriber_id: &str,
        creator_id: &str,
        tier: Tier,
        base: U256,
        claim: Option<Redemption>,
    ) -> EngineResult<Subscription> {
        let (price, sale_id) = match &claim {
            Some(redemption) => (redemption.final_price, Some(redemption.sale_id)),
            None => (base, None),
        };
        let result = self.subscriptions.subscribe_discounted(
            subscriber_id,
            creator_id,
            tier,
            price,
            self.catalog.currency(),
            sale_id,
        );
        self.settle_claim(subscriber_id, sale_id, result, |s| {
            (s.flash_sale_id, SettlementTarget::Subscription { subscription_id: s.id })
        })
    }

    fn open_purchase(
        &self,
        buyer_id: &str,
        item: &ContentItem,
        base: U256,
        claim: Option<Redemption>,
    ) -> EngineResult<Purchase> {
        let (price, sale_id) = match &claim {
            Some(redemption) => (redemption.final_price, Some(redemption.sale_id)),
            None => (base, None),
        };
        let result = self.purchases.request_purchase(PurchaseOrder {
            buyer_id,
            creator_id: &item.creator_id,
            content_item_id: &item.id,
            price,
            currency: &item.currency,
            flash_sale_id: sale_id,
        });
        self.settle_claim(buyer_id, sale_id, result, |p| {
            (p.flash_sale_id, SettlementTarget::Purchase { purchase_id: p.id })
        })
    }

    /// Attach a claimed redemption to the record it priced, or give the slot
    /// back when the record was not created at that price.
    fn settle_claim<T>(
        &self,
        user_id: &str,
        sale_id: Option<Uuid>,
        result: EngineResult<T>,
        priced_by: impl FnOnce(&T) -> (Option<Uuid>, SettlementTarget),
    ) -> EngineResult<T> {
        let Some(sale_id) = sale_id else {
            return result;
        };
        match result {
            Ok(record) => {
                let (record_sale, target) = priced_by(&record);
                if record_sale == Some(sale_id) {
                    self.sales.attach(sale_id, user_id, target)?;
                } else {
                    self.sales.release_claim(sale_id, user_id);
                }
                Ok(record)
            }
            Err(e) => {
                self.sales.release_claim(sale_id, user_id);
                Err(e)
            }
        }
    }

    /// A resubscription replaces an unpaid row; its claim goes back first.
    fn release_unpaid_subscription_claim(&self, subscriber_id: &str, creator_id: &str) {
        let Some(existing) = self.subscriptions.find(subscriber_id, creator_id) else {
            return;
        };
        if existing.payment_status() != PaymentStatus::Pending {
            return;
        }
        if let Some(sale_id) = existing.flash_sale_id {
            self.sales.release_claim(sale_id, subscriber_id);
        }
    }

    fn priced_item(&self, buyer_id: &str, content_item_id: &str) -> EngineResult<(ContentItem, U256)> {
        let item = self
            .content
            .content_item(content_item_id)?
            .ok_or_else(|| EngineError::not_found("content item", content_item_id))?;
        if item.creator_id == buyer_id {
            return Err(EngineError::validation("creators cannot buy their own content"));
        }
        let base = item
            .purchase_price()
            .ok_or_else(|| EngineError::validation("content item is not sold individually"))?;
        Ok((item, base))
    }

    fn applied_redemption(&self, sale_id: Uuid, user_id: &str) -> EngineResult<Redemption> {
        self.sales
            .get_redemption(sale_id, user_id)
            .ok_or_else(|| EngineError::not_found("redemption", format!("{}/{}", sale_id, user_id)))
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            ledger: self.ledger_name,
            subscriptions: self.subscriptions.summary(),
            active_sales: self.sales.active_sale_count(),
            content_items: self.content.len(),
            payees: self.payees.len(),
            audit_entries: self.audit.len(),
            price: self.prices.get_status(),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let (sales, redemptions) = self.sales.snapshot();
        let (audit_entries, proof_bindings) = self.audit.snapshot();
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: self.clock.now(),
            subscriptions: self.subscriptions.snapshot(),
            sales,
            redemptions,
            purchases: self.purchases.snapshot(),
            audit_entries,
            proof_bindings,
            content: self.content.snapshot(),
            payees: self.payees.snapshot(),
        }
    }

    /// Load a snapshot into a freshly built engine.
    pub fn restore(&self, snapshot: EngineSnapshot) {
        tracing::info!(records = snapshot.record_count(), "Restoring engine state");
        self.subscriptions.restore(snapshot.subscriptions);
        self.sales.restore(snapshot.sales, snapshot.redemptions);
        self.purchases.restore(snapshot.purchases);
        self.audit.restore(snapshot.audit_entries, snapshot.proof_bindings);
        self.content.restore(snapshot.content);
        self.payees.restore(snapshot.payees);
    }
}

/// Connect to the chain when enabled. Any failure degrades to a ledger that
/// reports itself unavailable, so verifications stay PENDING.
pub async fn connect_ledger(config: &BlockchainConfig) -> Arc<dyn PaymentLedger> {
    if !config.enabled {
        tracing::warn!("Blockchain integration disabled, payments cannot settle");
        return Arc::new(UnavailableLedger);
    }

    match BlockchainClient::new(config.clone()).await {
        Ok(client) => {
            if !client.is_healthy().await {
                tracing::warn!(rpc_url = %config.rpc_url, "Blockchain RPC not reachable yet, verification will retry");
            }
            Arc::new(EvmLedger::new(client))
        }
        Err(e) => {
            tracing::error!(error = %e, rpc_url = %config.rpc_url, "Blockchain client unavailable");
            Arc::new(UnavailableLedger)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ContentItem;
    use crate::blockchain::UnavailableLedger;
    use crate::clock::ManualClock;
    use crate::flash_sales::SaleConfig;
    use crate::pricing::{PriceSample, PricingError};
    use alloy::primitives::Address;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;

    const START: u64 = 1_700_000_000;

    struct FixedRate;

    impl RateSource for FixedRate {
        fn fetch_rate(&self) -> BoxFuture<'_, Result<PriceSample, PricingError>> {
            async {
                Ok(PriceSample {
                    rate: 2500.0,
                    source: "fixed".to_string(),
                })
            }
            .boxed()
        }
    }

    /// The monitor owns the queue's receiver; keep it alive to submit.
    fn engine_with_monitor() -> (Engine, PaymentMonitor) {
        let (engine, monitor) = Engine::build(
            &EngineConfig::default(),
            Arc::new(ManualClock::new(START)),
            Arc::new(UnavailableLedger),
            Arc::new(FixedRate),
        )
        .unwrap();
        engine
            .register_payee(CreatorPayee {
                creator_id: "creator".to_string(),
                payout_wallet: Address::repeat_byte(0x22),
                referrer_wallet: None,
            })
            .unwrap();
        (engine, monitor)
    }

    fn engine() -> Engine {
        engine_with_monitor().0
    }

    fn tier_sale(engine: &Engine, tier: Option<Tier>, max_redemptions: Option<u32>) -> Uuid {
        engine
            .sales
            .create_sale(SaleConfig {
                creator_id: "creator".to_string(),
                scope: SaleScope::Subscription { tier },
                discount_percent: 50,
                start_at: START,
                end_at: START + 3600,
                max_redemptions,
                title: None,
            })
            .unwrap()
            .id
    }

    fn priced_item(engine: &Engine) {
        engine
            .content
            .upsert(ContentItem {
                id: "video".to_string(),
                creator_id: "creator".to_string(),
                is_locked: true,
                min_required_tier: None,
                price: Some(U256::from(1_000u64)),
                currency: "ETH".to_string(),
                legacy_premium: false,
            })
            .unwrap();
    }

    #[test]
    fn test_subscribe_uses_tier_sale_price() {
        let engine = engine();
        let sale_id = tier_sale(&engine, Some(Tier::Premium), None);

        let discounted = engine.subscribe("fan", "creator", Tier::Premium).unwrap();
        assert_eq!(
            discounted.price_at_purchase,
            engine.catalog.default_price(Tier::Premium) / U256::from(2u64)
        );
        assert_eq!(discounted.flash_sale_id, Some(sale_id));
        let redemption = engine.sales.get_redemption(sale_id, "fan").unwrap();
        assert_eq!(redemption.final_price, discounted.price_at_purchase);
        assert_eq!(
            redemption.applied_to,
            Some(SettlementTarget::Subscription {
                subscription_id: discounted.id
            })
        );

        let full = engine.subscribe("other", "creator", Tier::Vip).unwrap();
        assert_eq!(full.price_at_purchase, engine.catalog.default_price(Tier::Vip));
        assert_eq!(full.flash_sale_id, None);
    }

    #[test]
    fn test_sale_discount_is_capped_by_slots() {
        let engine = engine();
        let sale_id = tier_sale(&engine, None, Some(1));
        let full_price = engine.catalog.default_price(Tier::Basic);

        let discounted: Vec<_> = (0..5)
            .map(|n| engine.subscribe(&format!("fan-{}", n), "creator", Tier::Basic).unwrap())
            .filter(|s| s.price_at_purchase < full_price)
            .collect();
        assert_eq!(discounted.len(), 1);
        assert_eq!(discounted[0].flash_sale_id, Some(sale_id));
        assert_eq!(engine.sales.listing(sale_id).unwrap().remaining, Some(0));
    }

    #[test]
    fn test_resubscribing_unpaid_keeps_one_claim() {
        let engine = engine();
        let sale_id = tier_sale(&engine, None, Some(1));

        let first = engine.subscribe("fan", "creator", Tier::Basic).unwrap();
        let second = engine.subscribe("fan", "creator", Tier::Premium).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.flash_sale_id, Some(sale_id));
        assert_eq!(
            second.price_at_purchase,
            engine.catalog.default_price(Tier::Premium) / U256::from(2u64)
        );
        assert_eq!(engine.sales.listing(sale_id).unwrap().remaining, Some(0));
    }

    #[test]
    fn test_failed_subscribe_gives_the_slot_back() {
        let engine = engine();
        let sale_id = tier_sale(&engine, None, Some(1));
        assert!(matches!(
            engine.subscribe("creator", "creator", Tier::Basic),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(engine.sales.listing(sale_id).unwrap().remaining, Some(1));
        assert!(engine.sales.get_redemption(sale_id, "creator").is_none());
    }

    #[test]
    fn test_apply_sale_rejects_instead_of_charging_full_price() {
        let engine = engine();
        let sale_id = tier_sale(&engine, None, Some(1));
        assert!(matches!(
            engine.apply_sale(sale_id, "fan", None),
            Err(EngineError::Validation(_))
        ));

        let applied = engine.apply_sale(sale_id, "fan", Some(Tier::Vip)).unwrap();
        let subscription = applied.subscription.unwrap();
        assert_eq!(subscription.tier, Tier::Vip);
        assert_eq!(subscription.price_at_purchase, applied.redemption.final_price);
        assert!(applied.redemption.applied_to.is_some());

        assert_eq!(
            engine.apply_sale(sale_id, "late", Some(Tier::Vip)).unwrap_err(),
            EngineError::SaleExhausted
        );
        assert!(engine.subscriptions.find("late", "creator").is_none());
    }

    #[test]
    fn test_purchase_claims_item_sale() {
        let engine = engine();
        priced_item(&engine);
        let sale_id = engine
            .sales
            .create_sale(SaleConfig {
                creator_id: "creator".to_string(),
                scope: SaleScope::ContentItem {
                    content_item_id: "video".to_string(),
                },
                discount_percent: 30,
                start_at: START,
                end_at: START + 3600,
                max_redemptions: Some(1),
                title: None,
            })
            .unwrap()
            .id;

        let purchase = engine.purchase("fan", "video").unwrap();
        assert_eq!(purchase.price, U256::from(700u64));
        assert_eq!(purchase.creator_id, "creator");
        assert_eq!(purchase.flash_sale_id, Some(sale_id));

        // Asking again returns the open purchase without a second claim.
        assert_eq!(engine.purchase("fan", "video").unwrap(), purchase);
        assert_eq!(engine.sales.listing(sale_id).unwrap().remaining, Some(0));
        assert_eq!(engine.purchase("other", "video").unwrap().price, U256::from(1_000u64));
    }

    #[test]
    fn test_purchase_requires_priced_item() {
        let engine = engine();
        engine
            .content
            .upsert(ContentItem {
                id: "free-post".to_string(),
                creator_id: "creator".to_string(),
                is_locked: true,
                min_required_tier: None,
                price: None,
                currency: "ETH".to_string(),
                legacy_premium: false,
            })
            .unwrap();

        assert!(matches!(
            engine.purchase("fan", "free-post"),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.purchase("fan", "missing"),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_check_payment_queues_pending_records() {
        let (engine, _monitor) = engine_with_monitor();
        let subscription = engine.subscribe("fan", "creator", Tier::Basic).unwrap();
        let request = SettlementRequest {
            proof_ref: "0xABC".to_string(),
            payer: Address::repeat_byte(0x11),
            target: SettlementTarget::Subscription {
                subscription_id: subscription.id,
            },
        };
        let state = engine.check_payment("fan", request.clone()).unwrap();
        assert_eq!(state.status, PaymentStatus::Pending);

        assert!(matches!(
            engine.check_payment("someone-else", request.clone()),
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            engine.check_payment(
                "fan",
                SettlementRequest {
                    proof_ref: " ".to_string(),
                    ..request
                }
            ),
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_check_payment_needs_a_payee() {
        let (engine, _monitor) = engine_with_monitor();
        let subscription = engine.subscribe("fan", "unpaid-creator", Tier::Basic).unwrap();
        let request = SettlementRequest {
            proof_ref: "0xabc".to_string(),
            payer: Address::repeat_byte(0x11),
            target: SettlementTarget::Subscription {
                subscription_id: subscription.id,
            },
        };
        assert!(matches!(
            engine.check_payment("fan", request),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_cancel_is_owner_only() {
        let engine = engine();
        let subscription = engine.subscribe("fan", "creator", Tier::Free).unwrap();
        assert!(matches!(
            engine.cancel_subscription("intruder", subscription.id),
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            engine.cancel_subscription("fan", Uuid::new_v4()),
            Err(EngineError::NotFound { .. })
        ));
        assert!(!engine.cancel_subscription("fan", subscription.id).unwrap().is_active);
    }

    #[test]
    fn test_snapshot_restores_into_fresh_engine() {
        let first = engine();
        first.subscribe("fan", "creator", Tier::Free).unwrap();
        let snapshot = first.snapshot();
        assert_eq!(snapshot.subscriptions.len(), 1);
        assert_eq!(snapshot.payees.len(), 1);

        let (second, _monitor) = Engine::build(
            &EngineConfig::default(),
            Arc::new(ManualClock::new(START)),
            Arc::new(UnavailableLedger),
            Arc::new(FixedRate),
        )
        .unwrap();
        second.restore(snapshot);
        assert!(second.subscriptions.is_entitled("fan", "creator"));
        assert_eq!(second.status().subscriptions.entitled, 1);
        assert!(second.payees.get("creator").is_some());
    }
}
