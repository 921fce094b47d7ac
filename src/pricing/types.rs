//! Price quote types and errors.

use serde::Serialize;
use thiserror::Error;

/// One accepted exchange-rate sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    /// Display-currency units per one settlement-currency unit.
    pub rate: f64,
    /// Seconds since epoch.
    pub fetched_at: u64,
    /// Provider that produced the sample.
    pub source: String,
}

/// A raw sample before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSample {
    pub rate: f64,
    pub source: String,
}

/// Cache health for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceStatus {
    /// Rate a caller would be served right now.
    pub rate: f64,
    pub last_update: Option<u64>,
    pub age_seconds: Option<u64>,
    /// No fetched value yet, or the latest refresh failed.
    pub using_fallback: bool,
    pub is_stale: bool,
    pub source: Option<String>,
    pub consecutive_errors: u32,
}

/// Errors from rate providers and sample validation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PricingError {
    #[error("HTTP error from {provider}: {message}")]
    Http { provider: String, message: String },

    #[error("Unexpected response from {provider}: {message}")]
    Parse { provider: String, message: String },

    #[error("Rate {rate} outside plausible range [{min}, {max}]")]
    OutOfRange { rate: f64, min: f64, max: f64 },

    #[error("Rate moved from {previous} to {rate}, more than {max_percent}%")]
    ExcessiveChange {
        previous: f64,
        rate: f64,
        max_percent: f64,
    },

    #[error("No rate providers configured")]
    NoProviders,

    #[error("All rate providers failed: {0}")]
    AllProvidersFailed(String),
}
