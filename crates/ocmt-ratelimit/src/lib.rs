//! # OCMT Ratelimit
//!
//! Fixed-window request counting keyed by `(limiter, identifier)`. The
//! window state prefers a shared cache so every control-plane replica sees
//! the same counters; the advance runs atomically on the cache server so
//! concurrent replicas cannot over-admit. When the cache is unreachable
//! the limiter falls back to a process-local map rather than failing the
//! request. Internal errors always fail open.

#![forbid(unsafe_code)]

pub mod cache;
pub mod headers;
pub mod tenant;
pub mod window;

pub use cache::{CacheError, RedisSharedCache, SharedCache, WindowSnapshot};
pub use headers::{rate_limit_headers, too_many_requests_body};
pub use tenant::{
    client_ip, RequestIdentity, TenantOutcome, TenantRateLimiter, TrustedProxies,
};
pub use window::{Decision, RateLimitConfig, RateLimiter};
