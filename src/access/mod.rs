//! Access control.
//!
//! # Responsibilities
//! - Decide whether a viewer may see a content item, with a reason
//! - Quote the unlock price (tier or item, after flash sales)
//!
//! # Design Decisions
//! - Reads only COMPLETED records through the owning components
//! - Fails closed: errors deny with `EvaluationError`
//! - Price display uses `PriceCache::peek_rate`, never a network call

pub mod content;
pub mod evaluator;
pub mod types;

pub use content::{ContentDirectory, InMemoryContent};
pub use evaluator::AccessControlEvaluator;
pub use types::{AccessDecision, AccessReason, ContentItem};
