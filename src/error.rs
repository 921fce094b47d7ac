//! Engine-wide error type.
//!
//! Every business operation returns [`EngineResult`]. Callers branch on
//! [`EngineError::class`] rather than on individual variants:
//!
//! | Class | Retried? | Surfaced as |
//! |---|---|---|
//! | `Validation` | never | rejected synchronously |
//! | `Conflict` | never | definitive business rejection |
//! | `NotFound` | never | rejected synchronously |
//! | `Unauthenticated` / `Forbidden` | never | rejected synchronously |
//! | `State` | never | logged, treated as a no-op by the reconciler |
//! | `TransientExternal` | by the reconciler, with bounded backoff | only after the budget is spent |

use serde::Serialize;
use thiserror::Error;

use crate::blockchain::types::BlockchainError;
use crate::payments::types::PaymentStatus;

/// Errors produced by the access & settlement engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Malformed input (bad discount percent, empty id, unknown tier...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The subscriber already holds an entitled subscription to this creator.
    #[error("an active subscription already exists for this subscriber and creator")]
    DuplicateActiveSubscription,

    /// The user already holds a redemption row for this sale.
    #[error("flash sale already redeemed by this user")]
    AlreadyRedeemed,

    /// Every redemption slot of the sale is taken.
    #[error("flash sale redemption limit reached")]
    SaleExhausted,

    /// The sale is inactive or outside its time window.
    #[error("flash sale is not currently effective")]
    SaleNotEffective,

    /// Another effective sale already covers the same scope.
    #[error("an active flash sale already exists for this scope")]
    OverlappingSale,

    /// The buyer already owns this content item.
    #[error("content item already purchased")]
    AlreadyPurchased,

    /// The referenced record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A payment-status transition that the state machine forbids.
    #[error("invalid payment state transition from {from} to {to}")]
    InvalidStateTransition { from: PaymentStatus, to: PaymentStatus },

    /// The operation acts on behalf of a user and no viewer was identified.
    #[error("a viewer identity is required")]
    Unauthenticated,

    /// The viewer is not the user the record belongs to.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// External ledger unreachable, lagging, or otherwise temporarily unusable.
    #[error("external dependency unavailable: {0}")]
    TransientExternal(String),
}

/// Coarse error taxonomy used for retry and response decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Conflict,
    NotFound,
    Unauthenticated,
    Forbidden,
    State,
    TransientExternal,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Validation(_) => ErrorClass::Validation,
            EngineError::DuplicateActiveSubscription
            | EngineError::AlreadyRedeemed
            | EngineError::SaleExhausted
            | EngineError::SaleNotEffective
            | EngineError::OverlappingSale
            | EngineError::AlreadyPurchased => ErrorClass::Conflict,
            EngineError::NotFound { .. } => ErrorClass::NotFound,
            EngineError::Unauthenticated => ErrorClass::Unauthenticated,
            EngineError::Forbidden(_) => ErrorClass::Forbidden,
            EngineError::InvalidStateTransition { .. } => ErrorClass::State,
            EngineError::TransientExternal(_) => ErrorClass::TransientExternal,
        }
    }

    /// Only external hiccups are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::TransientExternal
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub(crate) fn forbidden(msg: impl Into<String>) -> Self {
        EngineError::Forbidden(msg.into())
    }
}

impl From<BlockchainError> for EngineError {
    fn from(err: BlockchainError) -> Self {
        EngineError::TransientExternal(err.to_string())
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
