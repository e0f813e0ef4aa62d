//! Shared counter cache
//!
//! A distributed KV keeps the window counters visible to every replica.
//! The interface is one call: advance the counter for a key and learn
//! whether the request was admitted. The whole read-modify-write must
//! execute atomically on the cache server; two replicas advancing the
//! same key concurrently must never both observe the same prior count.
//! The redis implementation runs a Lua script to get that guarantee.
//! The limiter treats any cache failure as "use the local map".

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

/// A shared-cache failure; the limiter logs it and falls back
#[derive(Debug, Clone, thiserror::Error)]
#[error("shared cache error: {0}")]
pub struct CacheError(pub String);

/// Counter state after one atomic advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Whether this request was admitted
    pub admitted: bool,
    /// Admissions counted in the current window, this one included
    pub count: u32,
    /// Unix milliseconds the current window opened at
    pub window_start: i64,
}

/// The one operation the limiter needs from a shared cache
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Atomically advance the fixed-window counter for `key`: reset the
    /// window if it lapsed, admit and count if below `max`, refuse
    /// otherwise. Implementations must make the whole step atomic per key.
    async fn advance_window(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max: u32,
    ) -> Result<WindowSnapshot, CacheError>;
}

// Runs entirely inside redis so concurrent callers serialize on the key.
// Returns {admitted, count, window_start}.
const ADVANCE_WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
local start = tonumber(redis.call('HGET', KEYS[1], 'start') or '0')
if start == 0 or now - start > window_ms then
  count = 0
  start = now
end
local admitted = 0
if count < max then
  count = count + 1
  admitted = 1
end
redis.call('HSET', KEYS[1], 'count', count, 'start', start)
redis.call('PEXPIRE', KEYS[1], window_ms * 2)
return {admitted, count, start}
"#;

/// Redis-backed shared cache
pub struct RedisSharedCache {
    manager: ConnectionManager,
    script: Script,
}

impl RedisSharedCache {
    /// Connect to the given redis URL
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError(e.to_string()))?;
        Ok(Self {
            manager,
            script: Script::new(ADVANCE_WINDOW_SCRIPT),
        })
    }
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    async fn advance_window(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max: u32,
    ) -> Result<WindowSnapshot, CacheError> {
        let mut conn = self.manager.clone();
        let (admitted, count, window_start): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(max)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError(e.to_string()))?;
        Ok(WindowSnapshot {
            admitted: admitted == 1,
            count: count as u32,
            window_start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{RateLimitConfig, RateLimiter};
    use dashmap::DashMap;
    use ocmt_core::Clock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Cache double with per-key atomicity (an entry guard holds the key
    /// lock for the whole advance) that can be switched into a failing
    /// state.
    #[derive(Default)]
    struct FlakyCache {
        entries: DashMap<String, (u32, i64)>,
        broken: AtomicBool,
    }

    #[async_trait]
    impl SharedCache for FlakyCache {
        async fn advance_window(
            &self,
            key: &str,
            now_ms: i64,
            window_ms: i64,
            max: u32,
        ) -> Result<WindowSnapshot, CacheError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(CacheError("connection refused".into()));
            }
            let mut entry = self.entries.entry(key.to_string()).or_insert((0, now_ms));
            let (ref mut count, ref mut start) = *entry;
            if now_ms - *start > window_ms {
                *count = 0;
                *start = now_ms;
            }
            let admitted = *count < max;
            if admitted {
                *count += 1;
            }
            Ok(WindowSnapshot {
                admitted,
                count: *count,
                window_start: *start,
            })
        }
    }

    #[tokio::test]
    async fn shared_counters_use_the_spec_key_layout() {
        let cache = Arc::new(FlakyCache::default());
        let (clock, _) = Clock::manual(0);
        let limiter = RateLimiter::shared("control", cache.clone(), clock);

        limiter
            .check("web", "tenant:t-1", RateLimitConfig::per_seconds(5, 60))
            .await;
        assert!(cache
            .entries
            .contains_key("ocmt:ratelimit:control:web:tenant:t-1"));
    }

    #[tokio::test]
    async fn shared_path_enforces_the_limit() {
        let cache = Arc::new(FlakyCache::default());
        let (clock, _) = Clock::manual(0);
        let limiter = RateLimiter::shared("control", cache, clock);
        let config = RateLimitConfig::per_seconds(2, 60);

        assert!(limiter.check("web", "k", config).await.allowed);
        assert!(limiter.check("web", "k", config).await.allowed);
        let denied = limiter.check("web", "k", config).await;
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs.unwrap() <= 60);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_shared_admissions_never_exceed_the_limit() {
        let cache = Arc::new(FlakyCache::default());
        let (clock, _) = Clock::manual(0);
        let limiter = Arc::new(RateLimiter::shared("control", cache, clock));
        let config = RateLimitConfig::per_seconds(50, 60);

        let mut tasks = Vec::new();
        for _ in 0..200 {
            let limiter = Arc::clone(&limiter);
            tasks.push(tokio::spawn(async move {
                limiter.check("web", "shared", config).await.allowed
            }));
        }
        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);
    }

    #[tokio::test]
    async fn cache_outage_falls_back_to_local_counting() {
        let cache = Arc::new(FlakyCache::default());
        let (clock, _) = Clock::manual(0);
        let limiter = RateLimiter::shared("control", cache.clone(), clock);
        let config = RateLimitConfig::per_seconds(2, 60);

        cache.broken.store(true, Ordering::SeqCst);
        assert!(limiter.check("web", "k", config).await.allowed);
        assert!(limiter.check("web", "k", config).await.allowed);
        // The local fallback still enforces the limit.
        assert!(!limiter.check("web", "k", config).await.allowed);
    }
}
