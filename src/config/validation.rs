//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, percentages, rate bounds)
//! - Check that tier prices parse and URLs are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use alloy::primitives::utils::parse_ether;
use thiserror::Error;

use crate::config::schema::EngineConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("server.bind_address", "not a socket address"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be > 0"));
    }

    let prices = &config.tiers.prices;
    for (field, value) in [
        ("tiers.prices.free", &prices.free),
        ("tiers.prices.basic", &prices.basic),
        ("tiers.prices.premium", &prices.premium),
        ("tiers.prices.vip", &prices.vip),
    ] {
        if parse_ether(value).is_err() {
            errors.push(ValidationError::new(field, format!("invalid amount '{}'", value)));
        }
    }
    if config.tiers.period_days == 0 {
        errors.push(ValidationError::new("tiers.period_days", "must be > 0"));
    }

    let sales = &config.flash_sales;
    if sales.min_duration_minutes == 0 || sales.min_duration_minutes > sales.max_duration_minutes {
        errors.push(ValidationError::new(
            "flash_sales",
            "min_duration_minutes must be > 0 and <= max_duration_minutes",
        ));
    }

    let pricing = &config.pricing;
    if pricing.ttl_secs == 0 {
        errors.push(ValidationError::new("pricing.ttl_secs", "must be > 0"));
    }
    if pricing.refresh_interval_secs == 0 {
        errors.push(ValidationError::new("pricing.refresh_interval_secs", "must be > 0"));
    }
    if pricing.request_timeout_ms == 0 {
        errors.push(ValidationError::new("pricing.request_timeout_ms", "must be > 0"));
    }
    if !(pricing.min_rate > 0.0 && pricing.min_rate < pricing.max_rate) {
        errors.push(ValidationError::new("pricing", "require 0 < min_rate < max_rate"));
    }
    if !(pricing.min_rate..=pricing.max_rate).contains(&pricing.fallback_rate) {
        errors.push(ValidationError::new(
            "pricing.fallback_rate",
            "must lie within [min_rate, max_rate]",
        ));
    }
    if pricing.max_change_percent <= 0.0 {
        errors.push(ValidationError::new("pricing.max_change_percent", "must be > 0"));
    }
    for (i, provider) in pricing.providers.iter().enumerate() {
        if url::Url::parse(&provider.url).is_err() {
            errors.push(ValidationError::new(
                &format!("pricing.providers[{}].url", i),
                format!("invalid URL '{}'", provider.url),
            ));
        }
    }

    let chain = &config.blockchain;
    if chain.enabled {
        if url::Url::parse(&chain.rpc_url).is_err() {
            errors.push(ValidationError::new("blockchain.rpc_url", "invalid URL"));
        }
        if chain.rpc_timeout_secs == 0 {
            errors.push(ValidationError::new("blockchain.rpc_timeout_secs", "must be > 0"));
        }
    }

    let rec = &config.reconciler;
    if rec.max_attempts == 0 {
        errors.push(ValidationError::new("reconciler.max_attempts", "must be > 0"));
    }
    if rec.base_delay_ms > rec.max_delay_ms {
        errors.push(ValidationError::new(
            "reconciler.base_delay_ms",
            "must be <= max_delay_ms",
        ));
    }
    if rec.deadline_secs == 0 {
        errors.push(ValidationError::new("reconciler.deadline_secs", "must be > 0"));
    }
    if rec.max_concurrent == 0 || rec.queue_capacity == 0 {
        errors.push(ValidationError::new(
            "reconciler",
            "max_concurrent and queue_capacity must be > 0",
        ));
    }
    if rec.platform_wallet.is_some_and(|wallet| wallet.is_zero()) {
        errors.push(ValidationError::new(
            "reconciler.platform_wallet",
            "cannot be the zero address",
        ));
    }
    let fees = &rec.fees;
    if fees.platform_bps > 10_000
        || u32::from(fees.platform_with_referrer_bps) + u32::from(fees.referrer_bps) > 10_000
    {
        errors.push(ValidationError::new("reconciler.fees", "shares exceed 100%"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
