//! Fixed-window counter core

use dashmap::DashMap;
use std::sync::Arc;

use ocmt_core::Clock;

use crate::cache::{CacheError, SharedCache, WindowSnapshot};

/// Limit parameters for one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Admissions allowed per window
    pub max: u32,
    /// Window width in milliseconds
    pub window_ms: i64,
}

impl RateLimitConfig {
    /// `max` requests per `window_secs` seconds
    pub fn per_seconds(max: u32, window_secs: i64) -> Self {
        Self {
            max,
            window_ms: window_secs * 1000,
        }
    }
}

/// Local counter state
#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    window_start: i64,
    window_ms: i64,
}

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// The limit in force
    pub limit: u32,
    /// Admissions left in the current window
    pub remaining: u32,
    /// Unix seconds when the window resets
    pub reset_secs: i64,
    /// Seconds to wait before retrying; set only on rejection
    pub retry_after_secs: Option<i64>,
}

/// Fixed-window limiter with shared-cache preference and local fallback
pub struct RateLimiter {
    service: String,
    cache: Option<Arc<dyn SharedCache>>,
    local: DashMap<(String, String), WindowState>,
    clock: Clock,
}

impl RateLimiter {
    /// Limiter using only the process-local map
    pub fn local(service: impl Into<String>, clock: Clock) -> Self {
        Self {
            service: service.into(),
            cache: None,
            local: DashMap::new(),
            clock,
        }
    }

    /// Limiter preferring the given shared cache
    pub fn shared(service: impl Into<String>, cache: Arc<dyn SharedCache>, clock: Clock) -> Self {
        Self {
            service: service.into(),
            cache: Some(cache),
            local: DashMap::new(),
            clock,
        }
    }

    /// Check and count one request for `(limiter, identifier)`.
    ///
    /// Never blocks the caller on an internal failure: a broken cache
    /// degrades to the local map, and any other failure admits.
    pub async fn check(&self, limiter: &str, identifier: &str, config: RateLimitConfig) -> Decision {
        if let Some(cache) = self.cache.as_ref() {
            match self.check_shared(cache.as_ref(), limiter, identifier, config).await {
                Ok(decision) => return decision,
                Err(err) => {
                    tracing::warn!(error = %err, "shared rate-limit cache unavailable, using local fallback");
                }
            }
        }
        self.check_local(limiter, identifier, config)
    }

    /// Drop local entries whose windows have been idle for 2× their width;
    /// returns how many were removed.
    pub fn reap_idle(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.local.len();
        self.local
            .retain(|_, state| now - state.window_start <= 2 * state.window_ms);
        before - self.local.len()
    }

    // The cache advances the counter atomically server-side; this only
    // translates the snapshot into a decision.
    async fn check_shared(
        &self,
        cache: &dyn SharedCache,
        limiter: &str,
        identifier: &str,
        config: RateLimitConfig,
    ) -> Result<Decision, CacheError> {
        let key = format!(
            "ocmt:ratelimit:{}:{limiter}:{identifier}",
            self.service
        );
        let now = self.clock.now_ms();
        let snapshot = cache
            .advance_window(&key, now, config.window_ms, config.max)
            .await?;
        Ok(decision_from(snapshot, now, config))
    }

    fn check_local(&self, limiter: &str, identifier: &str, config: RateLimitConfig) -> Decision {
        let now = self.clock.now_ms();
        let key = (limiter.to_string(), identifier.to_string());
        // The entry guard holds the per-key lock across the whole advance.
        let mut entry = self.local.entry(key).or_insert(WindowState {
            count: 0,
            window_start: now,
            window_ms: config.window_ms,
        });
        if now - entry.window_start > config.window_ms {
            entry.count = 0;
            entry.window_start = now;
        }
        let admitted = entry.count < config.max;
        if admitted {
            entry.count += 1;
        }
        let snapshot = WindowSnapshot {
            admitted,
            count: entry.count,
            window_start: entry.window_start,
        };
        decision_from(snapshot, now, config)
    }
}

fn decision_from(snapshot: WindowSnapshot, now: i64, config: RateLimitConfig) -> Decision {
    let reset_secs = (snapshot.window_start + config.window_ms) / 1000;
    if snapshot.admitted {
        Decision {
            allowed: true,
            limit: config.max,
            remaining: config.max.saturating_sub(snapshot.count),
            reset_secs,
            retry_after_secs: None,
        }
    } else {
        let retry_after = (snapshot.window_start + config.window_ms - now + 999) / 1000;
        Decision {
            allowed: false,
            limit: config.max,
            remaining: 0,
            reset_secs,
            retry_after_secs: Some(retry_after.max(0)),
        }
    }
}
