//! Per-owner SSE subscriber registry
//!
//! Subscribers are bounded channels of pre-framed SSE records. A send that
//! fails (closed receiver or full buffer) ejects the subscriber; slow
//! consumers do not get to wedge the broadcast path.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use ocmt_core::OwnerId;

/// Buffered frames per subscriber before ejection
const SUBSCRIBER_BUFFER: usize = 32;

/// Encode one SSE record.
pub fn sse_frame(event_name: &str, payload: &Value) -> String {
    format!("event: {event_name}\ndata: {payload}\n\n")
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<String>,
}

/// A live subscription handed to the HTTP layer
pub struct SseSubscription {
    /// Subscriber id, for targeted ejection
    pub id: u64,
    /// Framed SSE records to drain into the response body
    pub frames: mpsc::Receiver<String>,
}

/// Concurrent registry of SSE subscribers keyed by owner
#[derive(Default)]
pub struct SseRegistry {
    subscribers: DashMap<OwnerId, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl SseRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for an owner.
    pub fn subscribe(&self, owner: OwnerId) -> SseSubscription {
        let (sender, frames) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(owner)
            .or_default()
            .push(Subscriber { id, sender });
        SseSubscription { id, frames }
    }

    /// Drop one subscriber explicitly.
    pub fn unsubscribe(&self, owner: OwnerId, id: u64) {
        if let Some(mut list) = self.subscribers.get_mut(&owner) {
            list.retain(|subscriber| subscriber.id != id);
        }
        self.subscribers.remove_if(&owner, |_, list| list.is_empty());
    }

    /// Write a framed record to every subscriber of `owner`, ejecting any
    /// that cannot accept it. Returns how many received the frame.
    pub fn broadcast_to_owner(&self, owner: OwnerId, event_name: &str, payload: &Value) -> usize {
        let frame = sse_frame(event_name, payload);
        let mut delivered = 0;
        if let Some(mut list) = self.subscribers.get_mut(&owner) {
            list.retain(|subscriber| match subscriber.sender.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    tracing::debug!(subscriber = subscriber.id, "ejecting unresponsive SSE subscriber");
                    false
                }
            });
        }
        self.subscribers.remove_if(&owner, |_, list| list.is_empty());
        delivered
    }

    /// Live subscriber count for an owner
    pub fn subscriber_count(&self, owner: OwnerId) -> usize {
        self.subscribers
            .get(&owner)
            .map_or(0, |list| list.len())
    }
}
