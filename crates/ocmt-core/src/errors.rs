//! Platform error taxonomy
//!
//! A single flat error shape crosses every subsystem boundary: a stable
//! kind (and code string) plus a human message, with optional retry and
//! detail payloads. Handlers at the HTTP edge serialize the public shape
//! and never surface stack traces or database-flavored messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Convenience result alias used across the control plane
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of operational error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No credentials were presented where some were required
    AuthRequired,
    /// Credentials were presented but failed verification
    AuthInvalid,
    /// Authenticated, but the action is not allowed
    Forbidden,
    /// A rate limit rejected the request
    RateLimited,
    /// The caller's input failed validation
    ValidationFailed,
    /// The referenced entity does not exist
    NotFound,
    /// The request conflicts with current state
    Conflict,
    /// A downstream dependency is unavailable
    ServiceUnavailable,
    /// Anything unexpected; details are never surfaced
    Internal,
}

impl ErrorKind {
    /// Stable wire code for this category
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::AuthInvalid => "auth_invalid",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether the error blames the caller rather than a downstream failure.
    ///
    /// Retry and alert routing branch on this: caller mistakes are never
    /// retried and never page anyone.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::AuthRequired
                | ErrorKind::AuthInvalid
                | ErrorKind::Forbidden
                | ErrorKind::RateLimited
                | ErrorKind::ValidationFailed
                | ErrorKind::NotFound
                | ErrorKind::Conflict
        )
    }
}

/// The error record carried through every subsystem boundary
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}", code = .kind.code())]
pub struct Error {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable message, safe to surface externally
    pub message: String,
    /// Seconds after which a retry may succeed (rate limiting)
    pub retry_after: Option<u64>,
    /// Extra context; only surfaced outside production builds
    pub details: Option<Value>,
}

impl Error {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            details: None,
        }
    }

    /// No credentials presented
    pub fn auth_required() -> Self {
        Self::new(ErrorKind::AuthRequired, "authentication required")
    }

    /// Credentials failed verification. The message is deliberately fixed:
    /// vault unlocks, token validation, and approval-token lookups must be
    /// indistinguishable to the caller.
    pub fn auth_invalid() -> Self {
        Self::new(ErrorKind::AuthInvalid, "authentication failed")
    }

    /// Action not allowed for this caller
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Rejected by a rate limit
    pub fn rate_limited(message: impl Into<String>, retry_after: u64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(ErrorKind::RateLimited, message)
        }
    }

    /// Caller input failed validation
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    /// Entity does not exist
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Request conflicts with current state
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Downstream dependency unavailable
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    /// Unexpected failure; message should stay generic
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Remap a storage-layer failure into a generic internal error.
    ///
    /// Duplicate-key, constraint, and syntax errors all collapse here so
    /// that schema details never leave the process.
    pub fn from_storage<E: std::fmt::Display>(err: E) -> Self {
        tracing::warn!(error = %err, "storage error remapped to internal");
        Self::new(ErrorKind::Internal, "storage operation failed")
    }

    /// Attach a detail payload
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The public wire shape: `{code, message}` plus `retryAfter`/`details`
    /// when present. `include_details` is false in production.
    pub fn to_public(&self, include_details: bool) -> PublicError {
        PublicError {
            code: self.kind.code().to_string(),
            message: self.message.clone(),
            retry_after: self.retry_after,
            details: if include_details {
                self.details.clone()
            } else {
                None
            },
        }
    }
}

/// External error representation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicError {
    /// Stable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Seconds until a retry may succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Extra context (non-production only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
