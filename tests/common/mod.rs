//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use access_engine::blockchain::{BlockchainError, LedgerObservation, ObservedTransfer, PaymentLedger};
use access_engine::clock::ManualClock;
use access_engine::config::EngineConfig;
use access_engine::engine::Engine;
use access_engine::lifecycle::Shutdown;
use access_engine::payments::{CreatorPayee, PaymentMonitor};
use access_engine::pricing::{PriceSample, PricingError, RateSource};
use access_engine::HttpServer;
use alloy::primitives::{Address, U256};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::TcpListener;

pub const START: u64 = 1_700_000_000;
pub const ADMIN_KEY: &str = "test-admin-key";

pub fn payer() -> Address {
    Address::repeat_byte(0x11)
}

pub fn creator_wallet() -> Address {
    Address::repeat_byte(0x22)
}

pub fn transfer(amount: U256) -> LedgerObservation {
    transfer_to(creator_wallet(), amount)
}

pub fn transfer_to(recipient: Address, amount: U256) -> LedgerObservation {
    LedgerObservation::Confirmed(ObservedTransfer {
        payer: payer(),
        recipient,
        amount,
        block_number: 100,
    })
}

/// In-memory ledger. Each proof replays a script of observations; the last
/// one repeats forever. Unknown proofs are `NotFound`. Scripts are keyed by
/// the lowercase `0x` spelling the engine looks proofs up by.
#[derive(Default)]
pub struct ScriptedLedger {
    scripts: Mutex<HashMap<String, VecDeque<Result<LedgerObservation, BlockchainError>>>>,
    calls: AtomicUsize,
}

impl ScriptedLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(
        &self,
        proof_ref: &str,
        steps: Vec<Result<LedgerObservation, BlockchainError>>,
    ) {
        self.scripts
            .lock()
            .unwrap()
            .insert(proof_ref.to_string(), steps.into());
    }

    pub fn confirm(&self, proof_ref: &str, amount: U256) {
        self.script(proof_ref, vec![Ok(transfer(amount))]);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PaymentLedger for ScriptedLedger {
    fn observe<'a>(
        &'a self,
        proof_ref: &'a str,
    ) -> BoxFuture<'a, Result<LedgerObservation, BlockchainError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(proof_ref) {
                Some(steps) if steps.len() > 1 => steps.pop_front().unwrap(),
                Some(steps) => steps.front().cloned().unwrap(),
                None => Ok(LedgerObservation::NotFound),
            }
        }
        .boxed()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Rate source returning a fixed rate and counting outbound fetches.
pub struct CountingRateSource {
    rate: f64,
    calls: AtomicUsize,
}

impl CountingRateSource {
    pub fn new(rate: f64) -> Arc<Self> {
        Arc::new(Self {
            rate,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RateSource for CountingRateSource {
    fn fetch_rate(&self) -> BoxFuture<'_, Result<PriceSample, PricingError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PriceSample {
                rate: self.rate,
                source: "counting".to_string(),
            })
        }
        .boxed()
    }
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.admin.api_key = ADMIN_KEY.to_string();
    config.reconciler.max_attempts = 3;
    config.reconciler.base_delay_ms = 5;
    config.reconciler.max_delay_ms = 20;
    config.reconciler.deadline_secs = 5;
    config.reconciler.sweep_interval_secs = 3600;
    config
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub monitor: Option<PaymentMonitor>,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<ScriptedLedger>,
    pub rates: Arc<CountingRateSource>,
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(START));
    let ledger = ScriptedLedger::new();
    let rates = CountingRateSource::new(2000.0);
    let (engine, monitor) =
        Engine::build(&config, clock.clone(), ledger.clone(), rates.clone()).unwrap();
    for creator_id in ["creator", "other-creator"] {
        engine
            .register_payee(CreatorPayee {
                creator_id: creator_id.to_string(),
                payout_wallet: creator_wallet(),
                referrer_wallet: None,
            })
            .unwrap();
    }
    Harness {
        engine: Arc::new(engine),
        monitor: Some(monitor),
        clock,
        ledger,
        rates,
    }
}

/// Serve the engine on an ephemeral port. Returns the base URL.
pub async fn serve(harness: &mut Harness, shutdown: &Shutdown) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    if let Some(monitor) = harness.monitor.take() {
        tokio::spawn(monitor.run(shutdown.subscribe()));
    }
    let server = HttpServer::new(harness.engine.clone(), &test_config());
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    format!("http://{}", addr)
}
