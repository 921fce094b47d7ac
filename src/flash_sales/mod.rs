//! Flash sales.
//!
//! # Responsibilities
//! - Create time-boxed discount campaigns scoped to a tier or a content item
//! - Hand out redemption slots atomically under a hard cap
//! - Answer price lookups for the access evaluator
//!
//! # Design Decisions
//! - Each sale and its redemption rows live in one `DashMap` entry; `redeem`
//!   does its check and insert under that entry's lock
//! - A redemption slot is held while PENDING or COMPLETED and released on
//!   FAILED, so the COMPLETED count never exceeds the cap

pub mod engine;
pub mod types;

pub use engine::{effective_price, FlashSaleEngine, SaleRules};
pub use types::{
    FlashSale, Redemption, RedemptionPreview, SaleConfig, SaleListing, SaleLookup, SaleScope,
};
