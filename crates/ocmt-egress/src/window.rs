//! Per-(owner, resource) call window
//!
//! A sliding window over the actual call timestamps: each check drops
//! entries older than the window and admits while fewer than the limit
//! remain. Defaults to 100 calls per hour.

use dashmap::DashMap;

use ocmt_core::{Clock, OwnerId, ResourceId};

/// Default calls per window
pub const DEFAULT_MAX_CALLS: usize = 100;
/// Default window width in seconds
pub const DEFAULT_WINDOW_SECS: i64 = 3600;

/// Sliding-window call counter
pub struct ResourceCallWindow {
    calls: DashMap<(OwnerId, ResourceId), Vec<i64>>,
    clock: Clock,
    max_calls: usize,
    window_ms: i64,
}

impl ResourceCallWindow {
    /// Window with the 100/hour default
    pub fn new(clock: Clock) -> Self {
        Self::with_limit(clock, DEFAULT_MAX_CALLS, DEFAULT_WINDOW_SECS)
    }

    /// Window with explicit limits
    pub fn with_limit(clock: Clock, max_calls: usize, window_secs: i64) -> Self {
        Self {
            calls: DashMap::new(),
            clock,
            max_calls,
            window_ms: window_secs * 1000,
        }
    }

    /// Admit and record one call, or report seconds until the oldest
    /// recorded call leaves the window.
    pub fn try_admit(&self, owner: OwnerId, resource: ResourceId) -> Result<(), i64> {
        let now = self.clock.now_ms();
        let mut entry = self.calls.entry((owner, resource)).or_default();
        entry.retain(|at| now - at < self.window_ms);
        if entry.len() >= self.max_calls {
            let oldest = entry.first().copied().unwrap_or(now);
            let retry_after = (oldest + self.window_ms - now + 999) / 1000;
            return Err(retry_after.max(1));
        }
        entry.push(now);
        Ok(())
    }

    /// Drop keys with no calls inside 2× the window; returns how many.
    pub fn reap_idle(&self) -> usize {
        let cutoff = self.clock.now_ms() - 2 * self.window_ms;
        let before = self.calls.len();
        self.calls
            .retain(|_, timestamps| timestamps.last().is_some_and(|at| *at >= cutoff));
        before - self.calls.len()
    }
}
