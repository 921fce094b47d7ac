//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::EngineConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.tiers.period_days, 30);
        assert_eq!(config.pricing.ttl_secs, 300);
        assert!(!config.blockchain.enabled);
    }

    #[test]
    fn test_partial_override() {
        let config = parse_config(
            r#"
            [pricing]
            ttl_secs = 60

            [tiers.prices]
            vip = "1.5"
            "#,
        )
        .unwrap();
        assert_eq!(config.pricing.ttl_secs, 60);
        assert_eq!(config.tiers.prices.vip, "1.5");
        assert_eq!(config.tiers.prices.basic, "0.05");
    }

    #[test]
    fn test_platform_wallet_parses_from_hex() {
        let config = parse_config(
            r#"
            [reconciler]
            platform_wallet = "0x3333333333333333333333333333333333333333"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.reconciler.platform_wallet,
            Some(alloy::primitives::Address::repeat_byte(0x33))
        );
        assert!(parse_config("[reconciler]\nplatform_wallet = \"0x12\"").is_err());
    }

    #[test]
    fn test_invalid_config_reports_all_errors() {
        let err = parse_config(
            r#"
            [pricing]
            ttl_secs = 0

            [reconciler]
            max_attempts = 0
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert!(errors.len() >= 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_config("[pricing\nttl_secs = 1"),
            Err(ConfigError::Parse(_))
        ));
    }
}
