//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Root configuration for the access & settlement engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// HTTP surface settings.
    pub server: ServerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Tier pricing and subscription period.
    pub tiers: TierConfig,

    /// Flash sale creation rules.
    pub flash_sales: FlashSaleConfig,

    /// Exchange-rate cache settings.
    pub pricing: PricingConfig,

    /// Blockchain integration settings.
    pub blockchain: BlockchainConfig,

    /// Payment verification and retry budget.
    pub reconciler: ReconcilerConfig,

    /// Snapshot persistence.
    pub persistence: PersistenceConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Default tier prices, in whole settlement-currency units (e.g. "0.15").
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TierPrices {
    pub free: String,
    pub basic: String,
    pub premium: String,
    pub vip: String,
}

impl Default for TierPrices {
    fn default() -> Self {
        Self {
            free: "0".to_string(),
            basic: "0.05".to_string(),
            premium: "0.15".to_string(),
            vip: "0.35".to_string(),
        }
    }
}

/// Tier catalog configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TierConfig {
    pub prices: TierPrices,

    /// Length of one subscription period in days.
    pub period_days: u64,

    /// Settlement currency symbol.
    pub currency: String,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            prices: TierPrices::default(),
            period_days: 30,
            currency: "ETH".to_string(),
        }
    }
}

/// Flash sale rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlashSaleConfig {
    /// Shortest allowed sale window in minutes.
    pub min_duration_minutes: u64,

    /// Longest allowed sale window in minutes.
    pub max_duration_minutes: u64,

    /// Reject a new sale while another effective one covers the same scope.
    pub reject_overlapping: bool,
}

impl Default for FlashSaleConfig {
    fn default() -> Self {
        Self {
            min_duration_minutes: 5,
            max_duration_minutes: 1440,
            reject_overlapping: true,
        }
    }
}

/// Kind of upstream exchange-rate API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateProviderKind {
    /// `GET {url}?ids={asset}&vs_currencies={quote}` → `{asset: {quote: f64}}`
    CoinGecko,
    /// `GET {url}?symbol={asset}` → `{"price": "123.45"}`
    Binance,
}

/// One upstream exchange-rate API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateProviderConfig {
    pub kind: RateProviderKind,
    pub url: String,
    /// Provider-specific asset id ("ethereum") or symbol ("ETHUSDT").
    pub asset: String,
}

/// Exchange-rate cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PricingConfig {
    /// A fetched rate is fresh for this many seconds.
    pub ttl_secs: u64,

    /// Background refresher period in seconds.
    pub refresh_interval_secs: u64,

    /// Minimum spacing between outbound refresh attempts in seconds.
    pub min_refresh_interval_secs: u64,

    /// Per-request timeout for provider calls in milliseconds.
    pub request_timeout_ms: u64,

    /// Rate served when nothing has ever been fetched.
    pub fallback_rate: f64,

    /// Plausible rate range; samples outside are discarded.
    pub min_rate: f64,
    pub max_rate: f64,

    /// Largest accepted move between two consecutive samples, in percent.
    pub max_change_percent: f64,

    /// Display currency (quote side of the pair).
    pub display_currency: String,

    /// Providers, tried in order.
    pub providers: Vec<RateProviderConfig>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            refresh_interval_secs: 240,
            min_refresh_interval_secs: 10,
            request_timeout_ms: 5000,
            fallback_rate: 3000.0,
            min_rate: 1.0,
            max_rate: 100_000.0,
            max_change_percent: 50.0,
            display_currency: "usd".to_string(),
            providers: vec![
                RateProviderConfig {
                    kind: RateProviderKind::CoinGecko,
                    url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
                    asset: "ethereum".to_string(),
                },
                RateProviderConfig {
                    kind: RateProviderKind::Binance,
                    url: "https://api.binance.com/api/v3/ticker/price".to_string(),
                    asset: "ETHUSDT".to_string(),
                },
            ],
        }
    }
}

/// Blockchain integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// Enable blockchain integration.
    pub enabled: bool,

    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    #[serde(default)]
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Number of block confirmations required for finality.
    pub confirmation_blocks: u32,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 1,
            rpc_timeout_secs: 10,
            confirmation_blocks: 3,
        }
    }
}

/// Fee split between creator, platform and referrer, in basis points.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Platform share when the creator has no referrer.
    pub platform_bps: u16,

    /// Platform share when a referrer takes a cut.
    pub platform_with_referrer_bps: u16,

    /// Referrer share.
    pub referrer_bps: u16,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            platform_bps: 1000,
            platform_with_referrer_bps: 500,
            referrer_bps: 500,
        }
    }
}

/// Payment verification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Polling attempts per verification before giving up.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Hard deadline for one verification run in seconds.
    pub deadline_secs: u64,

    /// Accepted difference between expected and observed amount, in gwei.
    pub amount_tolerance_gwei: u64,

    /// PENDING records older than this without a settled proof are failed.
    pub pending_max_age_secs: u64,

    /// How often the monitor sweeps for stale PENDING records.
    pub sweep_interval_secs: u64,

    /// Upper bound on verifications running at once.
    pub max_concurrent: usize,

    /// Capacity of the "check my payment" queue.
    pub queue_capacity: usize,

    /// Platform collection wallet. When set, every payment is made to it and
    /// the fee split is paid out from there; when unset, payments go straight
    /// to the creator's registered payout wallet.
    pub platform_wallet: Option<Address>,

    pub fees: FeeConfig,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            deadline_secs: 300,
            amount_tolerance_gwei: 1_000_000, // 0.001 ETH
            pending_max_age_secs: 3600,
            sweep_interval_secs: 60,
            max_concurrent: 16,
            queue_capacity: 1024,
            platform_wallet: None,
            fees: FeeConfig::default(),
        }
    }
}

/// Snapshot persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Path of the JSON snapshot; `None` keeps everything in memory only.
    pub snapshot_path: Option<String>,
}
