//! Background workers
//!
//! Sweepers are constructed explicitly, run on their own intervals, and
//! stop when the shared shutdown signal flips. None of them are on any
//! request path.

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A dependency whose health is polled periodically
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Stable name reported in health summaries
    fn name(&self) -> &str;

    /// One health check
    async fn healthy(&self) -> bool;
}

/// Latest known health of dependent services
#[derive(Default)]
pub struct HealthRegistry {
    probes: Vec<Arc<dyn HealthProbe>>,
    statuses: DashMap<String, bool>,
}

impl HealthRegistry {
    /// Registry over the given probes
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>) -> Self {
        Self {
            probes,
            statuses: DashMap::new(),
        }
    }

    /// Run every probe once and record the results.
    pub async fn refresh(&self) {
        for probe in &self.probes {
            let healthy = probe.healthy().await;
            let previous = self.statuses.insert(probe.name().to_string(), healthy);
            if previous == Some(!healthy) {
                if healthy {
                    tracing::info!(service = probe.name(), "dependency recovered");
                } else {
                    tracing::warn!(service = probe.name(), "dependency unhealthy");
                }
            }
        }
    }

    /// Last observed health, `None` before the first refresh
    pub fn status(&self, name: &str) -> Option<bool> {
        self.statuses.get(name).map(|status| *status)
    }
}

/// Owns the shutdown signal and every spawned worker
pub struct WorkerSet {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSet {
    /// Empty set with an unflipped shutdown signal
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// A receiver for the shared shutdown signal
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a worker future that honors the shutdown signal itself.
    pub fn spawn<F>(&mut self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push((name.to_string(), tokio::spawn(future)));
    }

    /// Spawn a sweeper that runs `tick` every `period` until shutdown.
    pub fn spawn_interval<T, Fut>(&mut self, name: &str, period: Duration, mut tick: T)
    where
        T: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut shutdown = self.shutdown_signal();
        let worker_name = name.to_string();
        self.spawn(name, async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so sweeps start
            // one period after boot.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    _ = shutdown.changed() => {
                        tracing::debug!(worker = %worker_name, "worker stopping");
                        break;
                    }
                }
            }
        });
    }

    /// Flip the signal and wait for every worker to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            if handle.await.is_err() {
                tracing::warn!(worker = %name, "worker panicked before shutdown");
            }
        }
    }
}
