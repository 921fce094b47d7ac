//! Subscription lifecycle: subscribe, settle, cancel, entitlement reads.

use alloy::primitives::U256;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::{EngineError, EngineResult};
use crate::observability::metrics;
use crate::payments::types::{FailureReason, PaymentState, PaymentStatus, Transition};
use crate::subscriptions::types::{LedgerSummary, Subscription, SubscriptionKey};
use crate::tiers::Tier;

/// Sole owner of subscription rows.
///
/// Rows are keyed by (subscriber, creator), so uniqueness is structural; a
/// second index maps record ids to keys. Writers lock the row shard first and
/// only then touch the id index, readers never hold both.
pub struct SubscriptionLedger {
    rows: DashMap<SubscriptionKey, Subscription>,
    ids: DashMap<Uuid, SubscriptionKey>,
    clock: SharedClock,
    period_secs: u64,
}

impl SubscriptionLedger {
    pub fn new(clock: SharedClock, period_secs: u64) -> Self {
        Self {
            rows: DashMap::new(),
            ids: DashMap::new(),
            clock,
            period_secs,
        }
    }

    /// Create the row for (subscriber, creator) or renew the existing one.
    ///
    /// Zero-priced subscriptions are COMPLETED immediately; everything else
    /// waits for the reconciler in PENDING.
    pub fn subscribe(
        &self,
        subscriber_id: &str,
        creator_id: &str,
        tier: Tier,
        price: U256,
        currency: &str,
    ) -> EngineResult<Subscription> {
        self.subscribe_discounted(subscriber_id, creator_id, tier, price, currency, None)
    }

    /// [`subscribe`](Self::subscribe) at a price set by the caller's claim on
    /// `flash_sale_id`.
    pub fn subscribe_discounted(
        &self,
        subscriber_id: &str,
        creator_id: &str,
        tier: Tier,
        price: U256,
        currency: &str,
        flash_sale_id: Option<Uuid>,
    ) -> EngineResult<Subscription> {
        if subscriber_id.trim().is_empty() || creator_id.trim().is_empty() {
            return Err(EngineError::validation("subscriber and creator ids are required"));
        }
        if subscriber_id == creator_id {
            return Err(EngineError::validation("creators cannot subscribe to themselves"));
        }
        if currency.trim().is_empty() {
            return Err(EngineError::validation("currency is required"));
        }

        let now = self.clock.now();
        let free = price.is_zero();
        let valid_until = now + self.period_secs;

        let subscription = match self.rows.entry(SubscriptionKey::new(subscriber_id, creator_id)) {
            Entry::Occupied(mut occupied) => {
                let row = occupied.get_mut();
                if row.grants_access(now) {
                    tracing::debug!(
                        subscription_id = %row.id,
                        subscriber = subscriber_id,
                        creator = creator_id,
                        "Rejected duplicate subscription"
                    );
                    return Err(EngineError::DuplicateActiveSubscription);
                }
                row.tier = tier;
                row.price_at_purchase = price;
                row.currency = currency.to_string();
                row.subscribed_at = now;
                row.valid_until = valid_until;
                row.is_active = true;
                row.billing_cycle += 1;
                row.flash_sale_id = flash_sale_id;
                row.payment.rearm(free, now);
                metrics::record_subscription_event("renewed");
                row.clone()
            }
            Entry::Vacant(vacant) => {
                let row = Subscription {
                    id: Uuid::new_v4(),
                    subscriber_id: subscriber_id.to_string(),
                    creator_id: creator_id.to_string(),
                    tier,
                    price_at_purchase: price,
                    currency: currency.to_string(),
                    subscribed_at: now,
                    valid_until,
                    is_active: true,
                    billing_cycle: 1,
                    flash_sale_id,
                    payment: if free {
                        PaymentState::completed_without_proof(now)
                    } else {
                        PaymentState::pending()
                    },
                };
                self.ids.insert(row.id, vacant.key().clone());
                metrics::record_subscription_event("created");
                vacant.insert(row).clone()
            }
        };

        tracing::info!(
            subscription_id = %subscription.id,
            subscriber = subscriber_id,
            creator = creator_id,
            tier = %tier,
            status = %subscription.payment.status,
            "Subscription recorded"
        );
        Ok(subscription)
    }

    /// PENDING → COMPLETED. Only the reconciler calls this.
    pub(crate) fn confirm_payment(&self, id: Uuid, proof_ref: &str) -> EngineResult<Transition> {
        let now = self.clock.now();
        let transition = self.with_row(id, |row| row.payment.confirm(proof_ref, now))?;
        if transition == Transition::Applied {
            metrics::record_subscription_event("confirmed");
            tracing::info!(subscription_id = %id, proof_ref, "Subscription payment confirmed");
        }
        Ok(transition)
    }

    /// PENDING → FAILED. Only the reconciler calls this.
    pub(crate) fn fail_payment(&self, id: Uuid, reason: FailureReason) -> EngineResult<Transition> {
        let now = self.clock.now();
        let detail = reason.to_string();
        let transition = self.with_row(id, |row| row.payment.fail(reason, now))?;
        if transition == Transition::Applied {
            metrics::record_subscription_event("failed");
            tracing::warn!(subscription_id = %id, reason = %detail, "Subscription payment failed");
        }
        Ok(transition)
    }

    /// Soft cancel: the row stays for audit, access ends now.
    pub fn cancel(&self, id: Uuid) -> EngineResult<Subscription> {
        let now = self.clock.now();
        let row = self.with_row(id, |row| {
            row.is_active = false;
            row.valid_until = now;
            Ok(row.clone())
        })?;
        metrics::record_subscription_event("cancelled");
        tracing::info!(subscription_id = %id, "Subscription cancelled");
        Ok(row)
    }

    /// The three-condition entitlement check, from a single row read.
    pub fn is_entitled(&self, subscriber_id: &str, creator_id: &str) -> bool {
        self.entitlement(subscriber_id, creator_id).is_some()
    }

    /// Tier the subscriber is entitled to right now, if any.
    pub fn entitlement(&self, subscriber_id: &str, creator_id: &str) -> Option<Tier> {
        let now = self.clock.now();
        self.rows
            .get(&SubscriptionKey::new(subscriber_id, creator_id))
            .filter(|row| row.grants_access(now))
            .map(|row| row.tier)
    }

    pub fn get(&self, id: Uuid) -> Option<Subscription> {
        let key = self.ids.get(&id).map(|k| k.value().clone())?;
        self.rows.get(&key).map(|r| r.value().clone())
    }

    pub fn find(&self, subscriber_id: &str, creator_id: &str) -> Option<Subscription> {
        self.rows
            .get(&SubscriptionKey::new(subscriber_id, creator_id))
            .map(|r| r.value().clone())
    }

    /// Payment state of a row, for the reconciler's idempotency check.
    pub fn payment_state(&self, id: Uuid) -> Option<PaymentState> {
        self.get(id).map(|s| s.payment)
    }

    /// Ids of rows still PENDING whose billing cycle began before `cutoff`.
    pub fn pending_since_before(&self, cutoff: u64) -> Vec<Uuid> {
        self.rows
            .iter()
            .filter(|r| r.payment.status == PaymentStatus::Pending && r.subscribed_at < cutoff)
            .map(|r| r.id)
            .collect()
    }

    pub fn summary(&self) -> LedgerSummary {
        let now = self.clock.now();
        let mut summary = LedgerSummary::default();
        for r in self.rows.iter() {
            match r.payment.status {
                PaymentStatus::Pending => summary.pending += 1,
                PaymentStatus::Failed => summary.failed += 1,
                PaymentStatus::Completed if r.grants_access(now) => summary.entitled += 1,
                PaymentStatus::Completed => summary.lapsed += 1,
            }
        }
        summary
    }

    pub fn snapshot(&self) -> Vec<Subscription> {
        self.rows.iter().map(|r| r.value().clone()).collect()
    }

    /// Load rows from a snapshot, replacing any row with the same key.
    pub fn restore(&self, rows: Vec<Subscription>) {
        for row in rows {
            let key = row.key();
            self.ids.insert(row.id, key.clone());
            self.rows.insert(key, row);
        }
        tracing::info!("Restored {} subscriptions", self.rows.len());
    }

    fn with_row<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Subscription) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let key = self
            .ids
            .get(&id)
            .map(|k| k.value().clone())
            .ok_or_else(|| EngineError::not_found("subscription", id))?;
        let mut row = self
            .rows
            .get_mut(&key)
            .ok_or_else(|| EngineError::not_found("subscription", id))?;
        f(row.value_mut())
    }
}
