//! Metrics collection and exposition.
//!
//! # Metrics
//! - `engine_access_decisions_total` (counter): access checks by allowed, reason
//! - `engine_redemptions_total` (counter): redemption attempts by outcome
//! - `engine_settlements_total` (counter): verification passes by outcome
//! - `engine_subscription_events_total` (counter): subscription lifecycle events
//! - `engine_price_refresh_total` (counter): rate refreshes by outcome
//! - `engine_price_rate` (gauge): last accepted exchange rate
//! - `engine_rpc_health` (gauge): 1=reachable, 0=failing, by endpoint role
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - The Prometheus exporter is only installed when enabled in config

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_access_decision(allowed: bool, reason: &'static str) {
    counter!(
        "engine_access_decisions_total",
        "allowed" => if allowed { "true" } else { "false" },
        "reason" => reason
    )
    .increment(1);
}

pub fn record_redemption(outcome: &'static str) {
    counter!("engine_redemptions_total", "outcome" => outcome).increment(1);
}

pub fn record_settlement(outcome: &'static str) {
    counter!("engine_settlements_total", "outcome" => outcome).increment(1);
}

pub fn record_subscription_event(event: &'static str) {
    counter!("engine_subscription_events_total", "event" => event).increment(1);
}

pub fn record_price_refresh(outcome: &'static str) {
    counter!("engine_price_refresh_total", "outcome" => outcome).increment(1);
}

pub fn set_price_rate(rate: f64) {
    gauge!("engine_price_rate").set(rate);
}

pub fn record_rpc_health(role: &'static str, healthy: bool) {
    gauge!("engine_rpc_health", "role" => role).set(if healthy { 1.0 } else { 0.0 });
}
