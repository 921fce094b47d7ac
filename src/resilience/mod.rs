//! Resilience helpers for calls to external systems.
//!
//! # Data Flow
//! ```text
//! PaymentReconciler polling loop
//!     → ledger observation pending or transient error
//!     → backoff.rs (delay before the next attempt)
//!     → retry until the attempt budget or the deadline is spent
//! ```
//!
//! # Design Decisions
//! - Delays grow exponentially and never exceed the configured ceiling
//! - Jitter spreads concurrent pollers apart

pub mod backoff;

pub use backoff::calculate_backoff;
