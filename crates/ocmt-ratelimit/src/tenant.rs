//! Tenant-aware limit resolution
//!
//! The identifier is `tenant:{id}` when the request carries an
//! authenticated tenant, otherwise `ip:{client}`, where the client IP
//! honors `X-Forwarded-For`/`X-Real-IP` only when the direct peer sits in
//! the trusted-proxy CIDR allow-list. The limit itself resolves as:
//! API-key override (zero or negative means unlimited), then the tenant's
//! plan, then the configured default. Unlimited short-circuits with no
//! counter I/O at all.

use std::net::IpAddr;
use std::sync::Arc;

use ocmt_core::{Plan, TenantId};

use crate::window::{Decision, RateLimitConfig, RateLimiter};

/// CIDR allow-list of proxies whose forwarding headers are trusted
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    cidrs: Vec<(IpAddr, u8)>,
}

impl TrustedProxies {
    /// Parse entries like `10.0.0.0/8` or `2001:db8::/32`. Malformed
    /// entries are rejected, not skipped.
    pub fn parse(entries: &[&str]) -> Result<Self, String> {
        let mut cidrs = Vec::with_capacity(entries.len());
        for entry in entries {
            let (addr, prefix) = entry
                .split_once('/')
                .ok_or_else(|| format!("missing prefix length: {entry}"))?;
            let addr: IpAddr = addr.parse().map_err(|_| format!("bad address: {entry}"))?;
            let prefix: u8 = prefix.parse().map_err(|_| format!("bad prefix: {entry}"))?;
            let max = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if prefix > max {
                return Err(format!("prefix too long: {entry}"));
            }
            cidrs.push((addr, prefix));
        }
        Ok(Self { cidrs })
    }

    /// Whether `ip` falls inside any listed CIDR
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.cidrs
            .iter()
            .any(|(network, prefix)| cidr_contains(*network, *prefix, ip))
    }
}

fn cidr_contains(network: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

/// Resolve the client IP for rate-limiting purposes.
pub fn client_ip(
    peer: IpAddr,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    trusted: &TrustedProxies,
) -> IpAddr {
    if !trusted.contains(peer) {
        return peer;
    }
    let forwarded = forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .and_then(|value| value.parse().ok());
    if let Some(ip) = forwarded {
        return ip;
    }
    real_ip
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(peer)
}

/// What the request authenticated as, for limit resolution
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    /// Authenticated tenant, if any
    pub tenant: Option<TenantId>,
    /// Tenant plan, when known
    pub plan: Option<Plan>,
    /// Per-API-key override; zero or negative means unlimited
    pub api_key_override: Option<i64>,
    /// Direct socket peer
    pub peer: IpAddr,
    /// `X-Forwarded-For` header, verbatim
    pub forwarded_for: Option<String>,
    /// `X-Real-IP` header, verbatim
    pub real_ip: Option<String>,
}

/// Outcome of a tenant-aware check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantOutcome {
    /// No limit applies; no counter was touched
    Unlimited,
    /// A counter was consulted
    Counted(Decision),
}

impl TenantOutcome {
    /// Whether the request proceeds
    pub fn allowed(&self) -> bool {
        match self {
            TenantOutcome::Unlimited => true,
            TenantOutcome::Counted(decision) => decision.allowed,
        }
    }
}

/// Tenant-aware wrapper over the fixed-window limiter
pub struct TenantRateLimiter {
    limiter: Arc<RateLimiter>,
    trusted: TrustedProxies,
    default_max: u32,
    window_secs: i64,
}

impl TenantRateLimiter {
    /// Wrap `limiter` with the given proxy allow-list and default limit
    pub fn new(
        limiter: Arc<RateLimiter>,
        trusted: TrustedProxies,
        default_max: u32,
        window_secs: i64,
    ) -> Self {
        Self {
            limiter,
            trusted,
            default_max,
            window_secs,
        }
    }

    /// Check one request against its resolved limit.
    pub async fn check(&self, limiter_name: &str, identity: &RequestIdentity) -> TenantOutcome {
        let max = match self.resolve_max(identity) {
            Some(max) => max,
            None => return TenantOutcome::Unlimited,
        };
        let identifier = self.identifier(identity);
        let config = RateLimitConfig::per_seconds(max, self.window_secs);
        TenantOutcome::Counted(self.limiter.check(limiter_name, &identifier, config).await)
    }

    /// `None` means unlimited.
    fn resolve_max(&self, identity: &RequestIdentity) -> Option<u32> {
        if let Some(override_max) = identity.api_key_override {
            if override_max <= 0 {
                return None;
            }
            return Some(override_max as u32);
        }
        if let Some(plan) = identity.plan {
            return Some(plan.request_limit());
        }
        Some(self.default_max)
    }

    fn identifier(&self, identity: &RequestIdentity) -> String {
        match identity.tenant {
            Some(tenant) => format!("tenant:{tenant}"),
            None => {
                let ip = client_ip(
                    identity.peer,
                    identity.forwarded_for.as_deref(),
                    identity.real_ip.as_deref(),
                    &self.trusted,
                );
                format!("ip:{ip}")
            }
        }
    }
}
