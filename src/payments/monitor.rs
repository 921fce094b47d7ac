//! Background settlement service.
//!
//! Accepts "check my payment" requests through a bounded queue and runs
//! verification off the request path, then periodically fails PENDING
//! records that never received a proof.

use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::clock::SharedClock;
use crate::config::ReconcilerConfig;
use crate::error::{EngineError, EngineResult};
use crate::payments::reconciler::PaymentReconciler;
use crate::payments::types::{SettlementRequest, SettlementTarget};

/// Producer half handed to request handlers.
#[derive(Clone)]
pub struct SettlementQueue {
    tx: mpsc::Sender<SettlementRequest>,
}

impl SettlementQueue {
    /// Enqueue without waiting. A full or stopped queue is a transient error.
    pub fn submit(&self, request: SettlementRequest) -> EngineResult<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                EngineError::TransientExternal("settlement queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                EngineError::TransientExternal("settlement monitor is not running".to_string())
            }
        })
    }
}

/// Service draining the settlement queue.
pub struct PaymentMonitor {
    reconciler: Arc<PaymentReconciler>,
    rx: mpsc::Receiver<SettlementRequest>,
    in_flight: Arc<DashSet<SettlementTarget>>,
    permits: Arc<Semaphore>,
    sweep_interval: Duration,
    clock: SharedClock,
}

/// Create a connected queue and monitor.
pub fn channel(
    reconciler: Arc<PaymentReconciler>,
    config: &ReconcilerConfig,
    clock: SharedClock,
) -> (SettlementQueue, PaymentMonitor) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let monitor = PaymentMonitor {
        reconciler,
        rx,
        in_flight: Arc::new(DashSet::new()),
        permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        clock,
    };
    (SettlementQueue { tx }, monitor)
}

impl PaymentMonitor {
    /// Run the monitor loop until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            sweep_interval_secs = self.sweep_interval.as_secs(),
            max_concurrent = self.permits.available_permits(),
            "Starting payment monitor"
        );

        let mut sweep = tokio::time::interval(self.sweep_interval);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                Some(request) = self.rx.recv() => {
                    self.dispatch(request, &mut tasks);
                }
                _ = sweep.tick() => {
                    let expired = self.reconciler.expire_stale_pending(self.clock.now());
                    if expired > 0 {
                        tracing::info!(expired, "Expired stale pending payments");
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Settlement task panicked");
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        if !tasks.is_empty() {
            tracing::info!(
                in_flight = tasks.len(),
                "Abandoning in-flight verifications; records stay pending"
            );
            tasks.abort_all();
        }
        tracing::info!("Payment monitor stopped");
    }

    fn dispatch(&self, request: SettlementRequest, tasks: &mut JoinSet<()>) {
        let target = request.target.clone();
        if !self.in_flight.insert(target.clone()) {
            tracing::debug!(record = %target, "Verification already running");
            return;
        }

        let reconciler = self.reconciler.clone();
        let in_flight = self.in_flight.clone();
        let permits = self.permits.clone();
        tasks.spawn(async move {
            if let Ok(_permit) = permits.acquire_owned().await {
                match reconciler.settle_with_retry(&request).await {
                    Ok(outcome) => tracing::debug!(
                        record = %target,
                        outcome = outcome.label(),
                        "Background verification finished"
                    ),
                    Err(e) => tracing::warn!(
                        record = %target,
                        error = %e,
                        "Background verification failed"
                    ),
                }
            }
            in_flight.remove(&target);
        });
    }
}
