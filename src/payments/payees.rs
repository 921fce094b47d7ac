//! Where a creator's payments must land.

use alloy::primitives::Address;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// A creator's payout wallet and the referrer sharing its platform fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorPayee {
    pub creator_id: String,
    pub payout_wallet: Address,
    #[serde(default)]
    pub referrer_wallet: Option<Address>,
}

/// Payee registry fed through the admin API.
#[derive(Debug, Default)]
pub struct PayeeRegistry {
    payees: DashMap<String, CreatorPayee>,
}

impl PayeeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a creator's payee record.
    pub fn register(&self, payee: CreatorPayee) -> EngineResult<()> {
        if payee.creator_id.trim().is_empty() {
            return Err(EngineError::validation("creator id is required"));
        }
        if payee.payout_wallet.is_zero() {
            return Err(EngineError::validation("payout wallet cannot be the zero address"));
        }
        if payee.referrer_wallet == Some(payee.payout_wallet) {
            return Err(EngineError::validation("a creator cannot refer themselves"));
        }
        tracing::info!(
            creator = %payee.creator_id,
            payout_wallet = %payee.payout_wallet,
            referred = payee.referrer_wallet.is_some(),
            "Creator payee registered"
        );
        self.payees.insert(payee.creator_id.clone(), payee);
        Ok(())
    }

    pub fn get(&self, creator_id: &str) -> Option<CreatorPayee> {
        self.payees.get(creator_id).map(|p| p.value().clone())
    }

    /// The payee of `creator_id`, or a validation error naming the creator.
    pub fn require(&self, creator_id: &str) -> EngineResult<CreatorPayee> {
        self.get(creator_id).ok_or_else(|| {
            EngineError::validation(format!(
                "creator '{}' has no payout wallet registered",
                creator_id
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.payees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payees.is_empty()
    }

    pub fn snapshot(&self) -> Vec<CreatorPayee> {
        self.payees.iter().map(|p| p.value().clone()).collect()
    }

    pub fn restore(&self, payees: Vec<CreatorPayee>) {
        for payee in payees {
            self.payees.insert(payee.creator_id.clone(), payee);
        }
    }
}
