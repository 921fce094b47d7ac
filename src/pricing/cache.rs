//! Bounded-staleness exchange-rate cache with single-flight refresh.

use arc_swap::ArcSwapOption;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::SharedClock;
use crate::config::PricingConfig;
use crate::observability::metrics;
use crate::pricing::source::RateSource;
use crate::pricing::types::{PriceQuote, PriceSample, PriceStatus, PricingError};

/// Cache tuning derived from [`PricingConfig`].
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub refresh_interval_secs: u64,
    pub min_refresh_interval_secs: u64,
    /// Upper bound on one refresh, across all providers.
    pub fetch_timeout: Duration,
    pub fallback_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub max_change_percent: f64,
}

impl From<&PricingConfig> for CacheSettings {
    fn from(config: &PricingConfig) -> Self {
        let providers = config.providers.len().max(1) as u64;
        Self {
            ttl_secs: config.ttl_secs,
            refresh_interval_secs: config.refresh_interval_secs,
            min_refresh_interval_secs: config.min_refresh_interval_secs,
            fetch_timeout: Duration::from_millis(config.request_timeout_ms * providers + 1000),
            fallback_rate: config.fallback_rate,
            min_rate: config.min_rate,
            max_rate: config.max_rate,
            max_change_percent: config.max_change_percent,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&PricingConfig::default())
    }
}

type InflightRefresh = Shared<BoxFuture<'static, f64>>;

#[derive(Default)]
struct RefreshSlot {
    inflight: Option<InflightRefresh>,
    last_attempt: Option<u64>,
}

struct Inner {
    source: Arc<dyn RateSource>,
    clock: SharedClock,
    settings: CacheSettings,
    current: ArcSwapOption<PriceQuote>,
    slot: Mutex<RefreshSlot>,
    consecutive_errors: AtomicU32,
}

impl Inner {
    fn slot(&self) -> std::sync::MutexGuard<'_, RefreshSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last known rate, however old, else the configured default.
    fn last_known_or_default(&self) -> f64 {
        self.current
            .load()
            .as_ref()
            .map_or(self.settings.fallback_rate, |q| q.rate)
    }

    fn validate(&self, sample: PriceSample, now: u64) -> Result<PriceSample, PricingError> {
        let s = &self.settings;
        if !sample.rate.is_finite() || sample.rate < s.min_rate || sample.rate > s.max_rate {
            return Err(PricingError::OutOfRange {
                rate: sample.rate,
                min: s.min_rate,
                max: s.max_rate,
            });
        }

        // Only compare against a reasonably recent sample; an old one would
        // pin the cache to a stale level forever.
        if let Some(previous) = self.current.load().as_ref() {
            let recent = now.saturating_sub(previous.fetched_at) <= s.ttl_secs.saturating_mul(2);
            let change = (sample.rate - previous.rate).abs() / previous.rate * 100.0;
            if recent && change > s.max_change_percent {
                return Err(PricingError::ExcessiveChange {
                    previous: previous.rate,
                    rate: sample.rate,
                    max_percent: s.max_change_percent,
                });
            }
        }
        Ok(sample)
    }

    async fn run_refresh(self: Arc<Self>) -> f64 {
        let fetched = match tokio::time::timeout(self.settings.fetch_timeout, self.source.fetch_rate()).await {
            Ok(result) => result,
            Err(_) => Err(PricingError::AllProvidersFailed("refresh timed out".to_string())),
        };
        let now = self.clock.now();

        let rate = match fetched.and_then(|sample| self.validate(sample, now)) {
            Ok(sample) => {
                self.current.store(Some(Arc::new(PriceQuote {
                    rate: sample.rate,
                    fetched_at: now,
                    source: sample.source.clone(),
                })));
                self.consecutive_errors.store(0, Ordering::Relaxed);
                metrics::record_price_refresh("success");
                metrics::set_price_rate(sample.rate);
                tracing::debug!(rate = sample.rate, source = %sample.source, "Exchange rate refreshed");
                sample.rate
            }
            Err(e) => {
                let errors = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
                let fallback = self.last_known_or_default();
                metrics::record_price_refresh("failure");
                tracing::warn!(
                    error = %e,
                    consecutive_errors = errors,
                    fallback_rate = fallback,
                    "Exchange rate refresh failed, serving fallback"
                );
                fallback
            }
        };

        self.slot().inflight = None;
        rate
    }
}

/// Process-wide exchange-rate cache. Cheap to clone.
///
/// Readers on the hot path use [`PriceCache::peek_rate`], which never waits.
/// [`PriceCache::get_rate`] refreshes a stale value first; concurrent callers
/// share one in-flight fetch and all receive its result.
#[derive(Clone)]
pub struct PriceCache {
    inner: Arc<Inner>,
}

impl PriceCache {
    pub fn new(source: Arc<dyn RateSource>, clock: SharedClock, settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                settings,
                current: ArcSwapOption::empty(),
                slot: Mutex::new(RefreshSlot::default()),
                consecutive_errors: AtomicU32::new(0),
            }),
        }
    }

    /// Cached rate when fresh, otherwise the result of a refresh. Never fails:
    /// a failed refresh yields the last known rate or the default.
    pub async fn get_rate(&self) -> f64 {
        let now = self.inner.clock.now();
        if let Some(quote) = self.inner.current.load().as_ref() {
            if now.saturating_sub(quote.fetched_at) <= self.inner.settings.ttl_secs {
                return quote.rate;
            }
        }
        self.refresh().await
    }

    /// Rate available right now without any I/O.
    pub fn peek_rate(&self) -> f64 {
        self.inner.last_known_or_default()
    }

    /// Join the in-flight refresh or start one, subject to the minimum
    /// interval between outbound attempts.
    pub async fn refresh(&self) -> f64 {
        match self.start_refresh() {
            Some(refresh) => refresh.await,
            None => self.inner.last_known_or_default(),
        }
    }

    fn start_refresh(&self) -> Option<InflightRefresh> {
        let mut slot = self.inner.slot();
        if let Some(inflight) = &slot.inflight {
            return Some(inflight.clone());
        }

        let now = self.inner.clock.now();
        if let Some(last) = slot.last_attempt {
            if now.saturating_sub(last) < self.inner.settings.min_refresh_interval_secs {
                return None;
            }
        }

        slot.last_attempt = Some(now);
        let refresh = self.inner.clone().run_refresh().boxed().shared();
        slot.inflight = Some(refresh.clone());
        Some(refresh)
    }

    pub fn get_status(&self) -> PriceStatus {
        let now = self.inner.clock.now();
        let consecutive_errors = self.inner.consecutive_errors.load(Ordering::Relaxed);
        let quote = self.inner.current.load_full();
        let age_seconds = quote.as_ref().map(|q| now.saturating_sub(q.fetched_at));

        PriceStatus {
            rate: self.peek_rate(),
            last_update: quote.as_ref().map(|q| q.fetched_at),
            age_seconds,
            using_fallback: quote.is_none() || consecutive_errors > 0,
            is_stale: age_seconds.map_or(true, |age| age > self.inner.settings.ttl_secs),
            source: quote.as_ref().map(|q| q.source.clone()),
            consecutive_errors,
        }
    }

    /// Keep the rate warm until shutdown.
    pub fn spawn_refresher(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cache = self.clone();
        let period = Duration::from_secs(self.inner.settings.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            tracing::info!(interval_secs = period.as_secs(), "Price refresher started");
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.refresh().await;
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Price refresher stopping");
                        break;
                    }
                }
            }
        })
    }
}
