//! Standard rate-limit response headers and the 429 body
//!
//! `RateLimit-*` is the primary family; the legacy `X-RateLimit-*` names
//! are mirrored for older clients. Rejections additionally carry
//! `Retry-After` and the structured body below.

use serde_json::{json, Value};

use crate::tenant::TenantOutcome;
use crate::window::Decision;

/// Header pairs for any outcome. Unlimited requests report
/// `RateLimit-Limit: unlimited` and nothing else.
pub fn rate_limit_headers(outcome: &TenantOutcome) -> Vec<(&'static str, String)> {
    match outcome {
        TenantOutcome::Unlimited => vec![
            ("RateLimit-Limit", "unlimited".to_string()),
            ("X-RateLimit-Limit", "unlimited".to_string()),
        ],
        TenantOutcome::Counted(decision) => {
            let mut headers = vec![
                ("RateLimit-Limit", decision.limit.to_string()),
                ("RateLimit-Remaining", decision.remaining.to_string()),
                ("RateLimit-Reset", decision.reset_secs.to_string()),
                ("X-RateLimit-Limit", decision.limit.to_string()),
                ("X-RateLimit-Remaining", decision.remaining.to_string()),
                ("X-RateLimit-Reset", decision.reset_secs.to_string()),
            ];
            if let Some(retry_after) = decision.retry_after_secs {
                headers.push(("Retry-After", retry_after.to_string()));
            }
            headers
        }
    }
}

/// The 429 response body
pub fn too_many_requests_body(decision: &Decision) -> Value {
    json!({
        "error": "Too many requests",
        "code": "RATE_LIMIT_EXCEEDED",
        "retryAfter": decision.retry_after_secs,
        "limit": decision.limit,
        "reset": decision.reset_secs,
    })
}
