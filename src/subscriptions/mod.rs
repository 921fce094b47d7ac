//! Subscription ledger.
//!
//! Owns subscription rows exclusively. Business fields (tier, price, period)
//! change only here; payment status changes only through the reconciler's
//! crate-private `confirm_payment` / `fail_payment` calls.

pub mod ledger;
pub mod types;

pub use ledger::SubscriptionLedger;
pub use types::{LedgerSummary, Subscription, SubscriptionKey};
