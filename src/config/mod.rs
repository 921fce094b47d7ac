//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → handed to Engine::build, which derives each component's settings
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{
    BlockchainConfig, EngineConfig, FeeConfig, FlashSaleConfig, PricingConfig, RateProviderConfig,
    RateProviderKind, ReconcilerConfig, TierConfig,
};
