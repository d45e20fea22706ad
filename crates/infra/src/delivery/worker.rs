//! Polling delivery worker.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::service::DeliveryService;

/// Delivery worker configuration.
#[derive(Debug, Clone)]
pub struct DeliveryWorkerConfig {
    /// Lease identity written to `locked_by`.
    pub worker_id: String,
    /// `claim_pending` limit per iteration.
    pub batch_size: usize,
    /// Sleep after an empty or failed claim.
    pub poll_interval: Duration,
}

impl Default for DeliveryWorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::now_v7()),
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl DeliveryWorkerConfig {
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub claim_errors: u64,
    pub uptime_secs: u64,
}

/// Handle to a running worker.
#[derive(Debug)]
pub struct DeliveryWorkerHandle {
    worker_id: String,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl DeliveryWorkerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Stop after the in-flight batch and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(worker_id = %self.worker_id, error = %err, "delivery worker task panicked");
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Runs `process_batch` in a loop on a tokio task.
pub struct DeliveryWorker;

impl DeliveryWorker {
    pub fn spawn(service: Arc<DeliveryService>, config: DeliveryWorkerConfig) -> DeliveryWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let worker_id = config.worker_id.clone();
        let join = tokio::spawn(worker_loop(service, config, shutdown_rx, stats.clone()));

        DeliveryWorkerHandle {
            worker_id,
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

async fn worker_loop(
    service: Arc<DeliveryService>,
    config: DeliveryWorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    info!(worker_id = %config.worker_id, batch_size = config.batch_size, "delivery worker started");
    let started = Instant::now();

    while !*shutdown_rx.borrow() {
        let result = service.process_batch(config.batch_size, &config.worker_id).await;

        let idle = {
            let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
            s.uptime_secs = started.elapsed().as_secs();
            match &result {
                Ok(report) => {
                    s.jobs_processed += report.claimed as u64;
                    s.jobs_succeeded += report.sent as u64;
                    s.jobs_failed += report.failed as u64;
                    report.claimed == 0
                }
                Err(_) => {
                    s.claim_errors += 1;
                    true
                }
            }
        };

        match result {
            Ok(report) if report.claimed > 0 => debug!(
                worker_id = %config.worker_id,
                claimed = report.claimed,
                sent = report.sent,
                failed = report.failed,
                "batch processed"
            ),
            Ok(_) => {}
            Err(err) => error!(worker_id = %config.worker_id, error = %err, "failed to claim jobs"),
        }

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                // A dropped handle also stops the worker.
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    info!(worker_id = %config.worker_id, "delivery worker stopped");
}
