//! Payment settlement subsystem.
//!
//! # Data Flow
//! ```text
//! "check my payment" (HTTP) → monitor.rs (queue, bounded concurrency)
//!     → reconciler.rs (observe proof on the ledger, match, settle)
//!         → SubscriptionLedger / FlashSaleEngine / PurchaseBook status writes
//!         → audit.rs (append outcome, bind proof to record)
//!         → payees.rs (recipient wallet and referrer of the record's creator)
//!         → distribution.rs (fee split of the observed amount)
//! monitor.rs sweep → reconciler.rs expire_stale_pending
//! ```
//!
//! # Design Decisions
//! - `types.rs` holds the one payment state machine every record embeds
//! - What a transfer must match is derived from the record and the payee
//!   registry; the client only names the proof and the wallet it paid from
//! - Status writes are crate-private on the record owners; only the
//!   reconciler calls them

pub mod audit;
pub mod distribution;
pub mod monitor;
pub mod payees;
pub mod reconciler;
pub mod types;

pub use audit::{AuditEntry, ProofAuditLog, ProofBinding};
pub use distribution::{FeePolicy, FeeSplit};
pub use monitor::{PaymentMonitor, SettlementQueue};
pub use reconciler::{PaymentReconciler, ReconcilerPolicy};
pub use payees::{CreatorPayee, PayeeRegistry};
pub use types::{
    FailureReason, PaymentExpectation, PaymentState, PaymentStatus, SettlementOutcome,
    SettlementRequest, SettlementTarget, Transition,
};
