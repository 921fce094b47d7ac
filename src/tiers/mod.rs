//! Subscription tiers: a fixed total order plus default prices.
//!
//! Pure lookups with no mutable state; shared freely behind an `Arc`.

pub mod catalog;

pub use catalog::{meets, required_rank, Tier, TierCatalog};
