//! # OCMT Audit
//!
//! Append-only audit events, written behind the request path. `record` is
//! synchronous and cannot fail the caller: events go into a bounded
//! channel and a flusher task batches them into the store. When the
//! channel is full the new event is dropped with a counter and a log
//! line, never backpressure.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use ocmt_core::{Clock, GroupId, OwnerId, Result};

/// Default queue capacity between `record` and the flusher
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
/// Events per store write
const FLUSH_BATCH: usize = 64;
/// Longest an event waits before a flush
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// One audit event, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Who acted
    pub actor_id: OwnerId,
    /// What happened, e.g. `vault.unlocked`, `capability.issued`
    pub event_type: String,
    /// What it happened to, when applicable
    pub target_id: Option<String>,
    /// Group context, when applicable
    pub group_id: Option<GroupId>,
    /// Source IP, when known
    pub ip: Option<String>,
    /// Whether the action succeeded
    pub success: bool,
    /// Failure description, for unsuccessful actions
    pub error: Option<String>,
    /// Unix seconds, stamped at record time
    pub timestamp: i64,
}

impl AuditEvent {
    /// A successful action
    pub fn success(actor_id: OwnerId, event_type: impl Into<String>) -> Self {
        Self {
            actor_id,
            event_type: event_type.into(),
            target_id: None,
            group_id: None,
            ip: None,
            success: true,
            error: None,
            timestamp: 0,
        }
    }

    /// A failed action
    pub fn failure(
        actor_id: OwnerId,
        event_type: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::success(actor_id, event_type)
        }
    }

    /// Attach a target id
    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Attach a group context
    pub fn with_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Attach a source IP
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

/// Batch sink the flusher writes into
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a batch; order within the batch is preserved
    async fn append_batch(&self, events: Vec<AuditEvent>) -> Result<()>;
}

/// In-memory store for tests and single-node use
#[derive(Default)]
pub struct InMemoryAuditStore {
    rows: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append_batch(&self, events: Vec<AuditEvent>) -> Result<()> {
        self.rows.write().extend(events);
        Ok(())
    }
}

/// The recording half handed to every subsystem
#[derive(Clone)]
pub struct AuditLog {
    sender: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
    clock: Clock,
}

impl AuditLog {
    /// Build a log and its flusher with the default queue capacity.
    pub fn new(store: Arc<dyn AuditStore>, clock: Clock) -> (Self, AuditFlusher) {
        Self::with_capacity(store, clock, DEFAULT_QUEUE_CAPACITY)
    }

    /// Build with an explicit queue capacity.
    pub fn with_capacity(
        store: Arc<dyn AuditStore>,
        clock: Clock,
        capacity: usize,
    ) -> (Self, AuditFlusher) {
        let (sender, receiver) = mpsc::channel(capacity);
        let log = Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
            clock,
        };
        let flusher = AuditFlusher { receiver, store };
        (log, flusher)
    }

    /// Record one event. Never blocks, never fails the caller.
    pub fn record(&self, mut event: AuditEvent) {
        event.timestamp = self.clock.now_secs();
        if self.sender.try_send(event).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped, "audit queue full, event dropped");
        }
    }

    /// Events lost to a full queue since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The write-behind worker; the runtime spawns `run`
pub struct AuditFlusher {
    receiver: mpsc::Receiver<AuditEvent>,
    store: Arc<dyn AuditStore>,
}

impl AuditFlusher {
    /// Drain the queue into the store until shutdown, then flush what is
    /// left.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut batch = Vec::with_capacity(FLUSH_BATCH);
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= FLUSH_BATCH {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = interval.tick() => self.flush(&mut batch).await,
                _ = shutdown.changed() => break,
            }
        }

        // Final drain so shutdown loses nothing that was queued.
        while let Ok(event) = self.receiver.try_recv() {
            batch.push(event);
        }
        self.flush(&mut batch).await;
    }

    async fn flush(&self, batch: &mut Vec<AuditEvent>) {
        if batch.is_empty() {
            return;
        }
        let events = std::mem::take(batch);
        let count = events.len();
        if let Err(err) = self.store.append_batch(events).await {
            tracing::error!(error = %err, count, "audit flush failed, batch lost");
        }
    }
}
