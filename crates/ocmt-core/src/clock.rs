//! Injectable time source
//!
//! Every time-dependent service takes a [`Clock`] instead of reading the
//! system clock directly, so tests can travel in time without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A shareable time source reporting Unix milliseconds
#[derive(Clone)]
pub struct Clock {
    now_ms: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock").finish_non_exhaustive()
    }
}

impl Clock {
    /// Wall-clock time
    pub fn system() -> Self {
        Self {
            now_ms: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// A clock driven by the given provider
    pub fn from_provider(provider: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        Self { now_ms: provider }
    }

    /// A manually advanced clock for tests, starting at `start_ms`
    pub fn manual(start_ms: i64) -> (Self, ManualClock) {
        let state = Arc::new(AtomicI64::new(start_ms));
        let handle = ManualClock {
            state: Arc::clone(&state),
        };
        let clock = Self {
            now_ms: Arc::new(move || state.load(Ordering::SeqCst)),
        };
        (clock, handle)
    }

    /// Current Unix time in milliseconds
    pub fn now_ms(&self) -> i64 {
        (self.now_ms)()
    }

    /// Current Unix time in whole seconds
    pub fn now_secs(&self) -> i64 {
        self.now_ms() / 1000
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

/// Handle that advances a manual [`Clock`]
#[derive(Clone)]
pub struct ManualClock {
    state: Arc<AtomicI64>,
}

impl ManualClock {
    /// Advance by the given number of seconds
    pub fn advance_secs(&self, secs: i64) {
        self.state.fetch_add(secs * 1000, Ordering::SeqCst);
    }

    /// Advance by the given number of milliseconds
    pub fn advance_ms(&self, ms: i64) {
        self.state.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute Unix-millisecond timestamp
    pub fn set_ms(&self, ms: i64) {
        self.state.store(ms, Ordering::SeqCst);
    }
}
