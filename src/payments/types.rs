//! Payment status, settlement targets and verification outcomes.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Settlement state of a subscription, redemption or purchase.
///
/// Never nullable: every record starts `Pending` unless it is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        })
    }
}

/// Why a record ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FailureReason {
    PayerMismatch { expected: Address, actual: Address },
    RecipientMismatch { expected: Address, actual: Address },
    AmountMismatch { expected: U256, actual: U256 },
    LedgerRejected { detail: String },
    ProofAlreadyUsed { proof_ref: String },
    VerificationTimeout,
    ProofNotSubmitted,
    /// A FAILED row restored without a recorded reason.
    Unrecorded,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::PayerMismatch { expected, actual } => {
                write!(f, "payer mismatch: expected {}, got {}", expected, actual)
            }
            FailureReason::RecipientMismatch { expected, actual } => {
                write!(f, "recipient mismatch: expected {}, got {}", expected, actual)
            }
            FailureReason::AmountMismatch { expected, actual } => {
                write!(f, "amount mismatch: expected {}, got {}", expected, actual)
            }
            FailureReason::LedgerRejected { detail } => write!(f, "ledger rejected: {}", detail),
            FailureReason::ProofAlreadyUsed { proof_ref } => {
                write!(f, "proof {} already settles another record", proof_ref)
            }
            FailureReason::VerificationTimeout => f.write_str("verification timed out"),
            FailureReason::ProofNotSubmitted => f.write_str("no proof of payment was submitted"),
            FailureReason::Unrecorded => f.write_str("failure reason was not recorded"),
        }
    }
}

/// Whether a state-machine call changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Unchanged,
}

/// Payment-status fields embedded in every settleable record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentState {
    pub status: PaymentStatus,
    pub proof_ref: Option<String>,
    pub failure: Option<FailureReason>,
    pub settled_at: Option<u64>,
}

impl PaymentState {
    pub fn pending() -> Self {
        Self::default()
    }

    /// State for zero-priced records: nothing to wait for.
    pub fn completed_without_proof(now: u64) -> Self {
        Self {
            status: PaymentStatus::Completed,
            proof_ref: None,
            failure: None,
            settled_at: Some(now),
        }
    }

    /// PENDING → COMPLETED. Repeating with the same proof is a no-op.
    pub fn confirm(&mut self, proof_ref: &str, now: u64) -> EngineResult<Transition> {
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Completed;
                self.proof_ref = Some(proof_ref.to_string());
                self.failure = None;
                self.settled_at = Some(now);
                Ok(Transition::Applied)
            }
            PaymentStatus::Completed if self.proof_ref.as_deref() == Some(proof_ref) => {
                Ok(Transition::Unchanged)
            }
            from => Err(EngineError::InvalidStateTransition {
                from,
                to: PaymentStatus::Completed,
            }),
        }
    }

    /// PENDING → FAILED. Failing an already failed record is a no-op.
    pub fn fail(&mut self, reason: FailureReason, now: u64) -> EngineResult<Transition> {
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Failed;
                self.failure = Some(reason);
                self.settled_at = Some(now);
                Ok(Transition::Applied)
            }
            PaymentStatus::Failed => Ok(Transition::Unchanged),
            from => Err(EngineError::InvalidStateTransition {
                from,
                to: PaymentStatus::Failed,
            }),
        }
    }

    /// Start a new billing cycle on an existing row.
    pub(crate) fn rearm(&mut self, free: bool, now: u64) {
        *self = if free {
            Self::completed_without_proof(now)
        } else {
            Self::pending()
        };
    }
}

/// The record a proof of payment is meant to settle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementTarget {
    Subscription { subscription_id: Uuid },
    Redemption { sale_id: Uuid, user_id: String },
    Purchase { purchase_id: Uuid },
}

impl fmt::Display for SettlementTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementTarget::Subscription { subscription_id } => {
                write!(f, "subscription:{}", subscription_id)
            }
            SettlementTarget::Redemption { sale_id, user_id } => {
                write!(f, "redemption:{}:{}", sale_id, user_id)
            }
            SettlementTarget::Purchase { purchase_id } => write!(f, "purchase:{}", purchase_id),
        }
    }
}

/// A client-submitted claim that a record was paid on the external ledger.
///
/// Only the proof and the paying wallet come from the client. Recipient,
/// amount and referrer are derived from the target record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    /// Ledger transaction reference (hex transaction hash).
    pub proof_ref: String,
    /// Wallet the viewer paid from.
    pub payer: Address,
    pub target: SettlementTarget,
}

/// What a matching transfer must look like, derived from the target record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentExpectation {
    pub payer: Address,
    pub recipient: Address,
    pub amount: U256,
    /// Creator's referrer, when one takes a fee share.
    pub referrer: Option<Address>,
}

/// Result of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// The record is COMPLETED.
    Settled { proof_ref: Option<String> },
    /// Not decidable yet; the record stays PENDING and the caller retries.
    Pending { detail: String },
    /// The record is FAILED.
    Rejected { reason: FailureReason },
}

impl SettlementOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, SettlementOutcome::Pending { .. })
    }

    /// Outcome describing a record that already reached a terminal state.
    pub fn from_terminal(state: &PaymentState) -> Option<Self> {
        match state.status {
            PaymentStatus::Pending => None,
            PaymentStatus::Completed => Some(SettlementOutcome::Settled {
                proof_ref: state.proof_ref.clone(),
            }),
            PaymentStatus::Failed => Some(SettlementOutcome::Rejected {
                reason: state.failure.clone().unwrap_or(FailureReason::Unrecorded),
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Settled { .. } => "settled",
            SettlementOutcome::Pending { .. } => "pending",
            SettlementOutcome::Rejected { .. } => "rejected",
        }
    }
}
