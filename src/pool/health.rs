use super::handle::ConnectionFactory;
use super::registry::PoolRegistry;
use crate::config::HealthCheckSettings;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Running {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Background sweeper that evicts idle, expired connections even when a
/// destination sees no foreground traffic.
///
/// Sweeps take the same per-destination lock as borrow and restore.
pub struct HealthChecker<F: ConnectionFactory> {
    registry: Arc<PoolRegistry<F>>,
    interval: Duration,
    shutdown_timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl<F: ConnectionFactory> HealthChecker<F> {
    pub fn new(registry: Arc<PoolRegistry<F>>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            shutdown_timeout: Duration::from_secs(5),
            running: Mutex::new(None),
        }
    }

    pub fn from_settings(registry: Arc<PoolRegistry<F>>, settings: &HealthCheckSettings) -> Self {
        Self::new(registry, settings.interval()).with_shutdown_timeout(settings.shutdown_timeout())
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Start the periodic sweep. Does nothing if already running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let registry = Arc::clone(&self.registry);
        let period = self.interval;
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep_registry(&registry).await;
                    }
                }
            }
        });

        *running = Some(Running { handle, cancel });
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Pool health checker started"
        );
    }

    /// Stop the sweep, waiting up to the shutdown timeout before aborting it.
    /// Does nothing if not running.
    pub async fn stop(&self) {
        let Some(Running { mut handle, cancel }) = self.running.lock().take() else {
            return;
        };

        cancel.cancel();
        if timeout(self.shutdown_timeout, &mut handle).await.is_err() {
            warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "Pool health checker did not stop in time, aborting"
            );
            handle.abort();
        }
        info!("Pool health checker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run one sweep over every known destination. Returns the number evicted.
    pub async fn run_once(&self) -> usize {
        sweep_registry(&self.registry).await
    }
}

impl<F: ConnectionFactory> Drop for HealthChecker<F> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

async fn sweep_registry<F: ConnectionFactory>(registry: &PoolRegistry<F>) -> usize {
    let start = Instant::now();
    let mut total_evicted = 0;

    for pool in registry.pools() {
        match pool.sweep_now().await {
            Ok(0) => {}
            Ok(evicted) => {
                debug!(uri = %pool.uri(), evicted, "Health check evicted connections");
                total_evicted += evicted;
            }
            Err(e) => {
                warn!(uri = %pool.uri(), error = %e, "Health check sweep failed");
            }
        }
    }

    if total_evicted > 0 {
        debug!(
            total_evicted,
            duration_ms = start.elapsed().as_millis() as u64,
            "Health check cycle completed"
        );
    }
    total_evicted
}
