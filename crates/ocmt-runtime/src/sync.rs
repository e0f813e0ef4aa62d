//! Per-owner credential synchronization
//!
//! Pushing refreshed credentials into a sandbox is slow and must never run
//! twice concurrently for one owner. Each owner gets a single worker task
//! with a one-slot inbox: a sync request lands in the slot, and further
//! requests while one is queued coalesce into it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use ocmt_core::OwnerId;

/// The actual credential push, provided by the container layer
#[async_trait]
pub trait CredentialSync: Send + Sync {
    /// Push the owner's current credentials into their sandbox
    async fn sync(&self, owner: OwnerId) -> ocmt_core::Result<()>;
}

/// Spawns and feeds the per-owner sync workers
pub struct SyncCoordinator {
    inboxes: DashMap<OwnerId, mpsc::Sender<()>>,
    sync: Arc<dyn CredentialSync>,
    shutdown: watch::Receiver<bool>,
}

impl SyncCoordinator {
    /// Coordinator wired to the shared shutdown signal
    pub fn new(sync: Arc<dyn CredentialSync>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            inboxes: DashMap::new(),
            sync,
            shutdown,
        }
    }

    /// Request a sync for `owner`. Returns `true` when the request was
    /// queued, `false` when it coalesced into one already waiting.
    pub fn request_sync(&self, owner: OwnerId) -> bool {
        let sender = self
            .inboxes
            .entry(owner)
            .or_insert_with(|| self.spawn_worker(owner))
            .clone();
        match sender.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                tracing::debug!(%owner, "sync request coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                // Worker exited (shutdown); drop the stale inbox.
                self.inboxes.remove(&owner);
                false
            }
        }
    }

    fn spawn_worker(&self, owner: OwnerId) -> mpsc::Sender<()> {
        let (sender, mut inbox) = mpsc::channel(1);
        let sync = Arc::clone(&self.sync);
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    request = inbox.recv() => match request {
                        Some(()) => {
                            if let Err(err) = sync.sync(owner).await {
                                tracing::warn!(%owner, error = %err, "credential sync failed");
                            }
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });
        sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct CountingSync {
        started: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl CredentialSync for CountingSync {
        async fn sync(&self, _owner: OwnerId) -> ocmt_core::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_requests_coalesce_while_one_is_queued() {
        let sync = Arc::new(CountingSync {
            started: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = SyncCoordinator::new(sync.clone(), shutdown_rx);
        let owner = OwnerId::new();

        // First request occupies the worker, second fills the slot, the
        // rest coalesce.
        assert!(coordinator.request_sync(owner));
        tokio::task::yield_now().await;
        assert!(coordinator.request_sync(owner));
        assert!(!coordinator.request_sync(owner));
        assert!(!coordinator.request_sync(owner));

        sync.release.notify_one();
        sync.release.notify_one();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(sync.started.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn owners_sync_independently() {
        let sync = Arc::new(CountingSync {
            started: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = SyncCoordinator::new(sync.clone(), shutdown_rx);

        assert!(coordinator.request_sync(OwnerId::new()));
        assert!(coordinator.request_sync(OwnerId::new()));
        tokio::task::yield_now().await;
        assert_eq!(sync.started.load(Ordering::SeqCst), 2);
    }
}
