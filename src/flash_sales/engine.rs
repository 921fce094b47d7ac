//! Flash sale campaigns with capped, atomic redemption.

use alloy::primitives::U256;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::FlashSaleConfig;
use crate::error::{EngineError, EngineResult};
use crate::flash_sales::types::{
    FlashSale, Redemption, RedemptionPreview, SaleConfig, SaleListing, SaleLookup, SaleScope,
};
use crate::observability::metrics;
use crate::payments::types::{
    FailureReason, PaymentState, PaymentStatus, SettlementTarget, Transition,
};
use crate::tiers::Tier;

/// Price after applying `sale`, or `base` when the sale is absent or not
/// effective at `now`.
pub fn effective_price(sale: Option<&FlashSale>, base: U256, now: u64) -> U256 {
    match sale {
        Some(sale) if sale.is_effective(now) => {
            let keep = 100u64.saturating_sub(u64::from(sale.discount_percent));
            base * U256::from(keep) / U256::from(100u64)
        }
        _ => base,
    }
}

/// Creation limits.
#[derive(Debug, Clone, Copy)]
pub struct SaleRules {
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    pub reject_overlapping: bool,
}

impl From<&FlashSaleConfig> for SaleRules {
    fn from(config: &FlashSaleConfig) -> Self {
        Self {
            min_duration_secs: config.min_duration_minutes * 60,
            max_duration_secs: config.max_duration_minutes * 60,
            reject_overlapping: config.reject_overlapping,
        }
    }
}

impl Default for SaleRules {
    fn default() -> Self {
        Self::from(&FlashSaleConfig::default())
    }
}

/// A sale and every redemption row against it, guarded by one shard lock.
///
/// `claimed` counts rows that hold a slot (PENDING or COMPLETED). It is only
/// read and written while the entry is locked, together with `redemptions`,
/// so the capacity check and the insert are one step.
#[derive(Debug)]
struct SaleEntry {
    sale: FlashSale,
    redemptions: HashMap<String, Redemption>,
    claimed: u32,
}

impl SaleEntry {
    fn remaining(&self) -> Option<u32> {
        self.sale
            .max_redemptions
            .map(|max| max.saturating_sub(self.claimed))
    }

    fn has_capacity(&self) -> bool {
        self.remaining().map_or(true, |r| r > 0)
    }

    /// Rejection `redeem` would return for `user_id`, in check order.
    fn redeem_blocker(&self, user_id: &str, now: u64) -> Option<EngineError> {
        if !self.sale.is_effective(now) {
            return Some(EngineError::SaleNotEffective);
        }
        if self
            .redemptions
            .get(user_id)
            .is_some_and(Redemption::holds_slot)
        {
            return Some(EngineError::AlreadyRedeemed);
        }
        if !self.has_capacity() {
            return Some(EngineError::SaleExhausted);
        }
        None
    }

    fn listing(&self) -> SaleListing {
        SaleListing {
            sale: self.sale.clone(),
            remaining: self.remaining(),
        }
    }
}

/// Sole owner of flash sales and their redemption rows.
pub struct FlashSaleEngine {
    sales: DashMap<Uuid, SaleEntry>,
    /// Serializes overlap check + insert in `create_sale`.
    create_lock: Mutex<()>,
    rules: SaleRules,
    clock: SharedClock,
}

impl FlashSaleEngine {
    pub fn new(clock: SharedClock, rules: SaleRules) -> Self {
        Self {
            sales: DashMap::new(),
            create_lock: Mutex::new(()),
            rules,
            clock,
        }
    }

    pub fn create_sale(&self, config: SaleConfig) -> EngineResult<FlashSale> {
        let now = self.clock.now();
        self.validate(&config, now)?;

        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.rules.reject_overlapping {
            let clash = self.sales.iter().any(|entry| {
                let other = &entry.sale;
                other.is_active
                    && other.creator_id == config.creator_id
                    && other.end_at > now
                    && other.scope.overlaps(&config.scope)
                    && other.start_at < config.end_at
                    && config.start_at < other.end_at
            });
            if clash {
                tracing::debug!(creator = %config.creator_id, "Rejected overlapping flash sale");
                return Err(EngineError::OverlappingSale);
            }
        }

        let sale = FlashSale {
            id: Uuid::new_v4(),
            creator_id: config.creator_id,
            scope: config.scope,
            discount_percent: config.discount_percent,
            start_at: config.start_at,
            end_at: config.end_at,
            max_redemptions: config.max_redemptions,
            is_active: true,
            title: config.title,
            created_at: now,
        };

        self.sales.insert(
            sale.id,
            SaleEntry {
                sale: sale.clone(),
                redemptions: HashMap::new(),
                claimed: 0,
            },
        );

        tracing::info!(
            sale_id = %sale.id,
            creator = %sale.creator_id,
            discount_percent = sale.discount_percent,
            max_redemptions = ?sale.max_redemptions,
            "Flash sale created"
        );
        Ok(sale)
    }

    fn validate(&self, config: &SaleConfig, now: u64) -> EngineResult<()> {
        if config.creator_id.trim().is_empty() {
            return Err(EngineError::validation("creator id is required"));
        }
        if let SaleScope::ContentItem { content_item_id } = &config.scope {
            if content_item_id.trim().is_empty() {
                return Err(EngineError::validation("content item id is required"));
            }
        }
        if config.discount_percent == 0 || config.discount_percent > 100 {
            return Err(EngineError::validation(format!(
                "discount percent must be between 1 and 100, got {}",
                config.discount_percent
            )));
        }
        if config.start_at >= config.end_at {
            return Err(EngineError::validation("sale must start before it ends"));
        }
        if config.end_at <= now {
            return Err(EngineError::validation("sale window is already over"));
        }
        let duration = config.end_at - config.start_at;
        if duration < self.rules.min_duration_secs || duration > self.rules.max_duration_secs {
            return Err(EngineError::validation(format!(
                "sale duration must be between {} and {} seconds, got {}",
                self.rules.min_duration_secs, self.rules.max_duration_secs, duration
            )));
        }
        if config.max_redemptions == Some(0) {
            return Err(EngineError::validation(
                "max redemptions must be positive; omit it for unlimited",
            ));
        }
        Ok(())
    }

    /// Claim one slot of `sale_id` for `user_id`, locking in the discounted
    /// price of `base_price`.
    ///
    /// Effectiveness, uniqueness and capacity are checked and the row is
    /// written while holding the sale's shard lock, so concurrent callers
    /// can never observe the same free slot. A fully discounted row is
    /// COMPLETED at once; it still holds its slot.
    pub fn redeem(&self, sale_id: Uuid, user_id: &str, base_price: U256) -> EngineResult<Redemption> {
        if user_id.trim().is_empty() {
            return Err(EngineError::validation("user id is required"));
        }
        let now = self.clock.now();

        let mut entry = self
            .sales
            .get_mut(&sale_id)
            .ok_or_else(|| EngineError::not_found("flash sale", sale_id))?;

        if let Some(err) = entry.redeem_blocker(user_id, now) {
            let outcome = match err {
                EngineError::SaleExhausted => "exhausted",
                EngineError::AlreadyRedeemed => "duplicate",
                _ => "not_effective",
            };
            metrics::record_redemption(outcome);
            tracing::debug!(sale_id = %sale_id, user = user_id, outcome, "Redemption rejected");
            return Err(err);
        }

        let discount_percent = entry.sale.discount_percent;
        let final_price = effective_price(Some(&entry.sale), base_price, now);
        let free = final_price.is_zero();
        let SaleEntry {
            redemptions,
            claimed,
            ..
        } = &mut *entry;

        let redemption = redemptions
            .entry(user_id.to_string())
            .and_modify(|row| {
                // A FAILED row is re-armed in place.
                row.redeemed_at = now;
                row.discount_percent = discount_percent;
                row.original_price = base_price;
                row.final_price = final_price;
                row.applied_to = None;
                row.payment.rearm(free, now);
            })
            .or_insert_with(|| Redemption {
                sale_id,
                user_id: user_id.to_string(),
                redeemed_at: now,
                discount_percent,
                original_price: base_price,
                final_price,
                applied_to: None,
                payment: if free {
                    PaymentState::completed_without_proof(now)
                } else {
                    PaymentState::pending()
                },
            })
            .clone();
        *claimed += 1;

        metrics::record_redemption("claimed");
        tracing::info!(
            sale_id = %sale_id,
            user = user_id,
            claimed = *claimed,
            final_price = %final_price,
            "Flash sale slot claimed"
        );
        Ok(redemption)
    }

    /// Record which subscription or purchase a redemption priced.
    pub(crate) fn attach(&self, sale_id: Uuid, user_id: &str, target: SettlementTarget) -> EngineResult<()> {
        let mut entry = self
            .sales
            .get_mut(&sale_id)
            .ok_or_else(|| EngineError::not_found("flash sale", sale_id))?;
        let row = entry
            .redemptions
            .get_mut(user_id)
            .ok_or_else(|| EngineError::not_found("redemption", format!("{}/{}", sale_id, user_id)))?;
        tracing::debug!(sale_id = %sale_id, user = user_id, record = %target, "Redemption attached");
        row.applied_to = Some(target);
        Ok(())
    }

    /// Give back a claim that was never paid: an unattached row whose record
    /// could not be created, or a PENDING row whose record is being
    /// resubmitted. Returns whether a slot was released.
    pub(crate) fn release_claim(&self, sale_id: Uuid, user_id: &str) -> bool {
        let Some(mut entry) = self.sales.get_mut(&sale_id) else {
            return false;
        };
        let releasable = entry.redemptions.get(user_id).is_some_and(|row| {
            row.holds_slot()
                && row.payment.proof_ref.is_none()
                && (row.applied_to.is_none() || row.payment.status == PaymentStatus::Pending)
        });
        if !releasable {
            return false;
        }
        entry.redemptions.remove(user_id);
        entry.claimed = entry.claimed.saturating_sub(1);
        metrics::record_redemption("released");
        tracing::debug!(sale_id = %sale_id, user = user_id, "Unpaid redemption released");
        true
    }

    /// PENDING → COMPLETED. Only the reconciler calls this.
    pub(crate) fn confirm_redemption(
        &self,
        sale_id: Uuid,
        user_id: &str,
        proof_ref: &str,
    ) -> EngineResult<Transition> {
        let now = self.clock.now();
        let mut entry = self
            .sales
            .get_mut(&sale_id)
            .ok_or_else(|| EngineError::not_found("flash sale", sale_id))?;
        let row = entry
            .redemptions
            .get_mut(user_id)
            .ok_or_else(|| EngineError::not_found("redemption", format!("{}/{}", sale_id, user_id)))?;

        let transition = row.payment.confirm(proof_ref, now)?;
        if transition == Transition::Applied {
            metrics::record_redemption("completed");
            tracing::info!(sale_id = %sale_id, user = user_id, proof_ref, "Redemption paid");
        }
        Ok(transition)
    }

    /// PENDING → FAILED, releasing the slot. Only the reconciler calls this.
    pub(crate) fn fail_redemption(
        &self,
        sale_id: Uuid,
        user_id: &str,
        reason: FailureReason,
    ) -> EngineResult<Transition> {
        let now = self.clock.now();
        let detail = reason.to_string();
        let mut entry = self
            .sales
            .get_mut(&sale_id)
            .ok_or_else(|| EngineError::not_found("flash sale", sale_id))?;
        let SaleEntry {
            redemptions,
            claimed,
            ..
        } = &mut *entry;
        let row = redemptions
            .get_mut(user_id)
            .ok_or_else(|| EngineError::not_found("redemption", format!("{}/{}", sale_id, user_id)))?;

        let transition = row.payment.fail(reason, now)?;
        if transition == Transition::Applied {
            *claimed = claimed.saturating_sub(1);
            metrics::record_redemption("failed");
            tracing::warn!(sale_id = %sale_id, user = user_id, reason = %detail, "Redemption failed, slot released");
        }
        Ok(transition)
    }

    pub fn deactivate(&self, sale_id: Uuid) -> EngineResult<FlashSale> {
        let mut entry = self
            .sales
            .get_mut(&sale_id)
            .ok_or_else(|| EngineError::not_found("flash sale", sale_id))?;
        entry.sale.is_active = false;
        tracing::info!(sale_id = %sale_id, "Flash sale deactivated");
        Ok(entry.sale.clone())
    }

    /// Effective sales for a creator or a content item, soonest-ending first,
    /// then by larger discount.
    pub fn list_effective_sales_for(&self, lookup: SaleLookup<'_>) -> Vec<SaleListing> {
        let now = self.clock.now();
        let mut listings: Vec<SaleListing> = self
            .sales
            .iter()
            .filter(|entry| entry.sale.is_effective(now))
            .filter(|entry| match lookup {
                SaleLookup::Creator(creator_id) => entry.sale.creator_id == creator_id,
                SaleLookup::ContentItem(content_item_id) => entry.sale.covers_content(content_item_id),
            })
            .map(|entry| entry.listing())
            .collect();

        listings.sort_by(|a, b| {
            a.sale
                .end_at
                .cmp(&b.sale.end_at)
                .then(b.sale.discount_percent.cmp(&a.sale.discount_percent))
        });
        listings
    }

    /// Largest effective, non-exhausted discount on one content item.
    pub fn best_sale_for_content(&self, creator_id: &str, content_item_id: &str) -> Option<FlashSale> {
        self.sales_for_content(creator_id, content_item_id).into_iter().next()
    }

    /// Largest effective, non-exhausted discount on a creator's tier.
    pub fn best_sale_for_tier(&self, creator_id: &str, tier: Tier) -> Option<FlashSale> {
        self.sales_for_tier(creator_id, tier).into_iter().next()
    }

    /// Effective, non-exhausted sales on one content item, largest discount
    /// first.
    pub fn sales_for_content(&self, creator_id: &str, content_item_id: &str) -> Vec<FlashSale> {
        self.open_sales(|sale| sale.creator_id == creator_id && sale.covers_content(content_item_id))
    }

    /// Effective, non-exhausted sales on a creator's tier, largest discount
    /// first.
    pub fn sales_for_tier(&self, creator_id: &str, tier: Tier) -> Vec<FlashSale> {
        self.open_sales(|sale| sale.creator_id == creator_id && sale.covers_tier(tier))
    }

    fn open_sales(&self, matches: impl Fn(&FlashSale) -> bool) -> Vec<FlashSale> {
        let now = self.clock.now();
        let mut sales: Vec<FlashSale> = self
            .sales
            .iter()
            .filter(|entry| entry.sale.is_effective(now) && entry.has_capacity() && matches(&entry.sale))
            .map(|entry| entry.sale.clone())
            .collect();
        sales.sort_by(|a, b| b.discount_percent.cmp(&a.discount_percent));
        sales
    }

    /// Whether `user_id` could redeem right now and what they would pay.
    /// Never writes.
    pub fn preview_redemption(
        &self,
        sale_id: Uuid,
        user_id: &str,
        base_price: U256,
    ) -> EngineResult<RedemptionPreview> {
        let now = self.clock.now();
        let entry = self
            .sales
            .get(&sale_id)
            .ok_or_else(|| EngineError::not_found("flash sale", sale_id))?;
        let blocker = entry.redeem_blocker(user_id, now);

        Ok(RedemptionPreview {
            sale_id,
            eligible: blocker.is_none(),
            blocked_by: blocker.map(|e| e.to_string()),
            original_price: base_price,
            discounted_price: effective_price(Some(&entry.sale), base_price, now),
            remaining: entry.remaining(),
        })
    }

    pub fn get_sale(&self, sale_id: Uuid) -> Option<FlashSale> {
        self.sales.get(&sale_id).map(|e| e.sale.clone())
    }

    /// The sale with its remaining capacity, effective or not.
    pub fn listing(&self, sale_id: Uuid) -> Option<SaleListing> {
        self.sales.get(&sale_id).map(|e| e.listing())
    }

    pub fn get_redemption(&self, sale_id: Uuid, user_id: &str) -> Option<Redemption> {
        self.sales
            .get(&sale_id)
            .and_then(|e| e.redemptions.get(user_id).cloned())
    }

    pub fn completed_count(&self, sale_id: Uuid) -> usize {
        self.sales.get(&sale_id).map_or(0, |e| {
            e.redemptions
                .values()
                .filter(|r| r.payment.status == PaymentStatus::Completed)
                .count()
        })
    }

    /// Unattached (sale, user) pairs still PENDING that were claimed before
    /// `cutoff`. Attached rows expire with their record.
    pub fn pending_redeemed_before(&self, cutoff: u64) -> Vec<(Uuid, String)> {
        self.sales
            .iter()
            .flat_map(|entry| {
                entry
                    .redemptions
                    .values()
                    .filter(|r| {
                        r.payment.status == PaymentStatus::Pending
                            && r.redeemed_at < cutoff
                            && r.applied_to.is_none()
                    })
                    .map(|r| (r.sale_id, r.user_id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn active_sale_count(&self) -> usize {
        let now = self.clock.now();
        self.sales.iter().filter(|e| e.sale.is_effective(now)).count()
    }

    pub fn snapshot(&self) -> (Vec<FlashSale>, Vec<Redemption>) {
        let mut sales = Vec::new();
        let mut redemptions = Vec::new();
        for entry in self.sales.iter() {
            sales.push(entry.sale.clone());
            redemptions.extend(entry.redemptions.values().cloned());
        }
        (sales, redemptions)
    }

    /// Load sales and redemptions; slot counts are recomputed from the rows.
    pub fn restore(&self, sales: Vec<FlashSale>, redemptions: Vec<Redemption>) {
        for sale in sales {
            self.sales.insert(
                sale.id,
                SaleEntry {
                    sale,
                    redemptions: HashMap::new(),
                    claimed: 0,
                },
            );
        }

        let mut orphans = 0usize;
        for redemption in redemptions {
            match self.sales.get_mut(&redemption.sale_id) {
                Some(mut entry) => {
                    if redemption.holds_slot() {
                        entry.claimed += 1;
                    }
                    entry.redemptions.insert(redemption.user_id.clone(), redemption);
                }
                None => orphans += 1,
            }
        }
        if orphans > 0 {
            tracing::warn!(orphans, "Dropped redemptions referring to unknown sales");
        }
        tracing::info!("Restored {} flash sales", self.sales.len());
    }
}
