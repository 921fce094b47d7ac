//! Exchange-rate pricing.
//!
//! # Data Flow
//! ```text
//! HttpRateSource (CoinGecko → Binance)
//!     → PriceCache (validate, publish via ArcSwap)
//!     → peek_rate() on the hot path / get_rate() for explicit price reads
//! ```
//!
//! # Design Decisions
//! - Price reads fail open: errors degrade to the last known or default rate
//! - One in-flight refresh at a time; concurrent callers await the same future
//! - A background refresher keeps the value inside its TTL

pub mod cache;
pub mod source;
pub mod types;

pub use cache::{CacheSettings, PriceCache};
pub use source::{HttpRateSource, RateSource};
pub use types::{PriceQuote, PriceSample, PriceStatus, PricingError};
