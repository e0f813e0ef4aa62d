//! SSRF guard
//!
//! Applied to every outbound URL whose destination a user controls. The
//! decision is made on the resolved address, not the hostname: literal IPs
//! are checked directly, hostnames are resolved first, and DNS failure is
//! a rejection. Blocked space: loopback, RFC 1918, link-local, unspecified,
//! IPv6 unique-local and link-local, plus the obvious hostname spellings
//! of localhost.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use reqwest::Url;

use crate::error::{EgressError, Result};

/// Validate a fully constructed outbound URL. `Ok(())` means the guard is
/// satisfied; any rejection is [`EgressError::SsrfBlocked`] except for
/// URLs that do not parse at all.
pub async fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| EgressError::UrlInvalid {
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(EgressError::UrlInvalid {
                reason: format!("scheme {other:?} is not allowed"),
            })
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| EgressError::UrlInvalid {
            reason: "url has no host".into(),
        })?
        .trim_matches(|c| c == '[' || c == ']')
        .to_ascii_lowercase();

    if is_denied_hostname(&host) {
        return Err(EgressError::SsrfBlocked);
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return check_address(ip);
    }

    // Hostname: the verdict belongs to the resolved address.
    let port = parsed.port_or_known_default().unwrap_or(443);
    let mut addresses = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|_| EgressError::SsrfBlocked)?
        .peekable();
    if addresses.peek().is_none() {
        return Err(EgressError::SsrfBlocked);
    }
    for address in addresses {
        check_address(address.ip())?;
    }
    Ok(())
}

fn is_denied_hostname(host: &str) -> bool {
    host == "localhost"
        || host.ends_with(".localhost")
        || host == "127.0.0.1"
        || host == "::1"
        || host == "0.0.0.0"
}

fn check_address(ip: IpAddr) -> Result<()> {
    let blocked = match ip {
        IpAddr::V4(v4) => blocked_v4(v4),
        IpAddr::V6(v6) => blocked_v6(v6),
    };
    if blocked {
        Err(EgressError::SsrfBlocked)
    } else {
        Ok(())
    }
}

fn blocked_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()        // 127.0.0.0/8
        || ip.is_private()  // 10/8, 172.16/12, 192.168/16
        || ip.is_link_local() // 169.254.0.0/16
        || ip.is_unspecified()
}

fn blocked_v6(ip: Ipv6Addr) -> bool {
    // IPv4 embedded in IPv6 gets the IPv4 rules.
    if let Some(v4) = ip.to_ipv4_mapped() {
        return blocked_v4(v4);
    }
    ip.is_loopback()
        || ip.is_unspecified()
        || (ip.segments()[0] & 0xfe00) == 0xfc00   // fc00::/7 unique-local
        || (ip.segments()[0] & 0xffc0) == 0xfe80   // fe80::/10 link-local
}
