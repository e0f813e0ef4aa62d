//! # OCMT Egress
//!
//! The only path by which user-directed HTTP leaves the platform. Every
//! invocation is checked against the owner's grant, the resource's state,
//! a per-`(owner, resource)` call window, and the SSRF guard, which
//! resolves hostnames before deciding, so a DNS name pointing at
//! 169.254.169.254 is just as dead as the literal address. Caller headers
//! are filtered, resource auth is injected from its encrypted config, and
//! the result is audited whatever the status code.

#![forbid(unsafe_code)]

pub mod auth;
pub mod error;
pub mod fabric;
pub mod ssrf;
pub mod types;
pub mod window;

pub use auth::{ApiKeyPlacement, AuthConfig};
pub use error::{EgressError, Result};
pub use fabric::{
    ActivitySink, CallAudit, CallRequest, CallResponse, EgressFabric, HttpExecutor,
    PreparedRequest, ReqwestExecutor, MAX_BODY_BYTES, RESOURCE_CALL_TIMEOUT,
};
pub use ssrf::validate_url;
pub use types::{GrantStatus, GrantStore, Resource, ResourceGrant, ResourceStatus, ResourceStore};
pub use window::ResourceCallWindow;
