//! Upstream exchange-rate providers.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{PricingConfig, RateProviderConfig, RateProviderKind};
use crate::pricing::types::{PriceSample, PricingError};

/// Anything that can produce a fresh rate sample.
pub trait RateSource: Send + Sync {
    fn fetch_rate(&self) -> BoxFuture<'_, Result<PriceSample, PricingError>>;
}

#[derive(Deserialize)]
struct BinanceTicker {
    price: String,
}

/// Public HTTP price APIs, tried in configured order until one answers.
pub struct HttpRateSource {
    client: reqwest::Client,
    providers: Vec<RateProviderConfig>,
    quote_currency: String,
}

impl HttpRateSource {
    pub fn new(config: &PricingConfig) -> Result<Self, PricingError> {
        if config.providers.is_empty() {
            return Err(PricingError::NoProviders);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| PricingError::Http {
                provider: "client".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            providers: config.providers.clone(),
            quote_currency: config.display_currency.to_ascii_lowercase(),
        })
    }

    async fn fetch_from(&self, provider: &RateProviderConfig) -> Result<f64, PricingError> {
        let name = provider_name(provider.kind);
        let http_err = |e: reqwest::Error| PricingError::Http {
            provider: name.to_string(),
            message: e.to_string(),
        };
        let parse_err = |message: String| PricingError::Parse {
            provider: name.to_string(),
            message,
        };

        match provider.kind {
            RateProviderKind::CoinGecko => {
                let body: serde_json::Value = self
                    .client
                    .get(&provider.url)
                    .query(&[
                        ("ids", provider.asset.as_str()),
                        ("vs_currencies", self.quote_currency.as_str()),
                    ])
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(http_err)?
                    .json()
                    .await
                    .map_err(http_err)?;
                body.get(&provider.asset)
                    .and_then(|asset| asset.get(&self.quote_currency))
                    .and_then(serde_json::Value::as_f64)
                    .ok_or_else(|| parse_err(format!("missing {}.{}", provider.asset, self.quote_currency)))
            }
            RateProviderKind::Binance => {
                let ticker: BinanceTicker = self
                    .client
                    .get(&provider.url)
                    .query(&[("symbol", provider.asset.as_str())])
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(http_err)?
                    .json()
                    .await
                    .map_err(http_err)?;
                ticker
                    .price
                    .parse::<f64>()
                    .map_err(|e| parse_err(format!("price '{}': {}", ticker.price, e)))
            }
        }
    }
}

impl RateSource for HttpRateSource {
    fn fetch_rate(&self) -> BoxFuture<'_, Result<PriceSample, PricingError>> {
        async move {
            let mut failures = Vec::new();
            for provider in &self.providers {
                match self.fetch_from(provider).await {
                    Ok(rate) => {
                        return Ok(PriceSample {
                            rate,
                            source: provider_name(provider.kind).to_string(),
                        })
                    }
                    Err(e) => {
                        tracing::warn!(provider = provider_name(provider.kind), error = %e, "Rate provider failed");
                        failures.push(e.to_string());
                    }
                }
            }
            Err(PricingError::AllProvidersFailed(failures.join("; ")))
        }
        .boxed()
    }
}

fn provider_name(kind: RateProviderKind) -> &'static str {
    match kind {
        RateProviderKind::CoinGecko => "coingecko",
        RateProviderKind::Binance => "binance",
    }
}
