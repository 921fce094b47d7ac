//! One-off content purchases.

use alloy::primitives::U256;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::{EngineError, EngineResult};
use crate::payments::types::{FailureReason, PaymentState, PaymentStatus, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PurchaseKey {
    buyer_id: String,
    content_item_id: String,
}

/// A buyer's purchase of one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: Uuid,
    pub buyer_id: String,
    /// Owner of the item when the purchase was opened; payments go to them.
    #[serde(default)]
    pub creator_id: String,
    pub content_item_id: String,
    pub price: U256,
    pub currency: String,
    pub requested_at: u64,
    /// Sale whose redemption priced this purchase, settled together with it.
    #[serde(default)]
    pub flash_sale_id: Option<Uuid>,
    pub payment: PaymentState,
}

/// Input to [`PurchaseBook::request_purchase`].
#[derive(Debug, Clone, Copy)]
pub struct PurchaseOrder<'a> {
    pub buyer_id: &'a str,
    pub creator_id: &'a str,
    pub content_item_id: &'a str,
    pub price: U256,
    pub currency: &'a str,
    pub flash_sale_id: Option<Uuid>,
}

impl Purchase {
    pub fn payment_status(&self) -> PaymentStatus {
        self.payment.status
    }

    fn key(&self) -> PurchaseKey {
        PurchaseKey {
            buyer_id: self.buyer_id.clone(),
            content_item_id: self.content_item_id.clone(),
        }
    }
}

/// Sole owner of purchase rows, unique on (buyer, content item).
pub struct PurchaseBook {
    rows: DashMap<PurchaseKey, Purchase>,
    ids: DashMap<Uuid, PurchaseKey>,
    clock: SharedClock,
}

impl PurchaseBook {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            rows: DashMap::new(),
            ids: DashMap::new(),
            clock,
        }
    }

    /// Open (or reopen) a purchase at the order's price.
    ///
    /// A PENDING row is returned as is; a FAILED row is re-armed at the new
    /// price; a COMPLETED row is a conflict.
    pub fn request_purchase(&self, order: PurchaseOrder<'_>) -> EngineResult<Purchase> {
        let PurchaseOrder {
            buyer_id,
            creator_id,
            content_item_id,
            price,
            currency,
            flash_sale_id,
        } = order;
        if buyer_id.trim().is_empty() || content_item_id.trim().is_empty() || creator_id.trim().is_empty() {
            return Err(EngineError::validation(
                "buyer, creator and content item ids are required",
            ));
        }
        let now = self.clock.now();
        let free = price.is_zero();
        let key = PurchaseKey {
            buyer_id: buyer_id.to_string(),
            content_item_id: content_item_id.to_string(),
        };

        let purchase = match self.rows.entry(key) {
            Entry::Occupied(mut occupied) => {
                let row = occupied.get_mut();
                match row.payment.status {
                    PaymentStatus::Completed => return Err(EngineError::AlreadyPurchased),
                    PaymentStatus::Pending => return Ok(row.clone()),
                    PaymentStatus::Failed => {
                        row.creator_id = creator_id.to_string();
                        row.price = price;
                        row.currency = currency.to_string();
                        row.requested_at = now;
                        row.flash_sale_id = flash_sale_id;
                        row.payment.rearm(free, now);
                        row.clone()
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let row = Purchase {
                    id: Uuid::new_v4(),
                    buyer_id: buyer_id.to_string(),
                    creator_id: creator_id.to_string(),
                    content_item_id: content_item_id.to_string(),
                    price,
                    currency: currency.to_string(),
                    requested_at: now,
                    flash_sale_id,
                    payment: if free {
                        PaymentState::completed_without_proof(now)
                    } else {
                        PaymentState::pending()
                    },
                };
                self.ids.insert(row.id, vacant.key().clone());
                vacant.insert(row).clone()
            }
        };

        tracing::info!(
            purchase_id = %purchase.id,
            buyer = buyer_id,
            content_item = content_item_id,
            flash_sale = ?purchase.flash_sale_id,
            status = %purchase.payment.status,
            "Purchase recorded"
        );
        Ok(purchase)
    }

    pub fn find(&self, buyer_id: &str, content_item_id: &str) -> Option<Purchase> {
        let key = PurchaseKey {
            buyer_id: buyer_id.to_string(),
            content_item_id: content_item_id.to_string(),
        };
        self.rows.get(&key).map(|r| r.value().clone())
    }

    pub fn has_purchased(&self, buyer_id: &str, content_item_id: &str) -> bool {
        let key = PurchaseKey {
            buyer_id: buyer_id.to_string(),
            content_item_id: content_item_id.to_string(),
        };
        self.rows
            .get(&key)
            .is_some_and(|row| row.payment.status == PaymentStatus::Completed)
    }

    pub(crate) fn confirm_payment(&self, id: Uuid, proof_ref: &str) -> EngineResult<Transition> {
        let now = self.clock.now();
        let transition = self.with_row(id, |row| row.payment.confirm(proof_ref, now))?;
        if transition == Transition::Applied {
            tracing::info!(purchase_id = %id, proof_ref, "Purchase paid");
        }
        Ok(transition)
    }

    pub(crate) fn fail_payment(&self, id: Uuid, reason: FailureReason) -> EngineResult<Transition> {
        let now = self.clock.now();
        let detail = reason.to_string();
        let transition = self.with_row(id, |row| row.payment.fail(reason, now))?;
        if transition == Transition::Applied {
            tracing::warn!(purchase_id = %id, reason = %detail, "Purchase payment failed");
        }
        Ok(transition)
    }

    pub fn get(&self, id: Uuid) -> Option<Purchase> {
        let key = self.ids.get(&id).map(|k| k.value().clone())?;
        self.rows.get(&key).map(|r| r.value().clone())
    }

    pub fn pending_since_before(&self, cutoff: u64) -> Vec<Uuid> {
        self.rows
            .iter()
            .filter(|r| r.payment.status == PaymentStatus::Pending && r.requested_at < cutoff)
            .map(|r| r.id)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Purchase> {
        self.rows.iter().map(|r| r.value().clone()).collect()
    }

    pub fn restore(&self, rows: Vec<Purchase>) {
        for row in rows {
            let key = row.key();
            self.ids.insert(row.id, key.clone());
            self.rows.insert(key, row);
        }
        tracing::info!("Restored {} purchases", self.rows.len());
    }

    fn with_row<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Purchase) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let key = self
            .ids
            .get(&id)
            .map(|k| k.value().clone())
            .ok_or_else(|| EngineError::not_found("purchase", id))?;
        let mut row = self
            .rows
            .get_mut(&key)
            .ok_or_else(|| EngineError::not_found("purchase", id))?;
        f(row.value_mut())
    }
}
