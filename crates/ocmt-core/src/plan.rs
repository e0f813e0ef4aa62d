//! Tenant plan tiers
//!
//! Plans live in the billing system; the control plane only needs the tier
//! name and the request-rate entitlement it implies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Billing plan of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Free tier
    #[default]
    Free,
    /// Paid individual tier
    Pro,
    /// Contract tier
    Enterprise,
}

impl Plan {
    /// Requests allowed per rate-limit window for this plan
    pub fn request_limit(&self) -> u32 {
        match self {
            Plan::Free => 100,
            Plan::Pro => 500,
            Plan::Enterprise => 2000,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        };
        f.write_str(name)
    }
}
