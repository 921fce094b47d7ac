//! Access & settlement engine for a creator-content platform.
//!
//! Decides who may see gated content, tracks subscriptions, one-off
//! purchases and flash-sale redemptions, and settles their payments against
//! an external ledger.
//!
//! # Architecture Overview
//!
//! ```text
//!   viewer ──▶ http ──▶ access::AccessControlEvaluator ──▶ subscriptions / purchases
//!                 │                       │                  flash_sales / tiers
//!                 │                       └──▶ pricing::PriceCache (peek only)
//!                 │
//!                 └──▶ "check my payment" ──▶ payments::SettlementQueue
//!                                                 │
//!                      payments::PaymentMonitor ◀─┘ (background, bounded)
//!                                │
//!                      payments::PaymentReconciler ──▶ blockchain::PaymentLedger
//!                                │
//!                      sole writer of payment status on every record
//! ```

// Domain
pub mod access;
pub mod flash_sales;
pub mod payments;
pub mod pricing;
pub mod purchases;
pub mod subscriptions;
pub mod tiers;

// Integration
pub mod admin;
pub mod blockchain;
pub mod engine;
pub mod http;
pub mod storage;

// Cross-cutting concerns
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, EngineResult, ErrorClass};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
