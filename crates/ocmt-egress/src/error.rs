//! Egress error surface

/// Convenience result alias for egress operations
pub type Result<T> = std::result::Result<T, EgressError>;

/// Why an outbound call was refused or failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EgressError {
    /// The owner has no `connected` grant for the resource
    #[error("resource is not connected")]
    NotConnected,

    /// The grant lacks the permission the HTTP method requires
    #[error("grant does not allow {required}")]
    PermissionDenied {
        /// The permission the method maps to
        required: ocmt_core::Permission,
    },

    /// The resource exists but is not active
    #[error("resource is not active")]
    ResourceInactive,

    /// The resource does not exist
    #[error("resource not found")]
    ResourceNotFound,

    /// The per-(owner, resource) call window is exhausted
    #[error("resource call limit reached")]
    RateLimited {
        /// Seconds until the oldest counted call leaves the window
        retry_after_secs: i64,
    },

    /// The destination resolves into blocked address space
    #[error("ssrf_blocked")]
    SsrfBlocked,

    /// The URL did not parse, or used a non-HTTP scheme
    #[error("invalid url: {reason}")]
    UrlInvalid {
        /// What was wrong with it
        reason: String,
    },

    /// The HTTP method has no permission mapping
    #[error("unsupported method: {method}")]
    UnsupportedMethod {
        /// The offending method
        method: String,
    },

    /// Request or response body exceeded the size cap
    #[error("body exceeds size limit")]
    BodyTooLarge,

    /// The resource's stored auth configuration failed to decrypt or parse
    #[error("resource auth configuration invalid")]
    AuthConfigInvalid,

    /// Transport failure, including the 30 s deadline
    #[error("outbound call failed: {reason}")]
    Transport {
        /// Driver-level description
        reason: String,
    },
}

impl From<EgressError> for ocmt_core::Error {
    fn from(err: EgressError) -> Self {
        use ocmt_core::Error;
        match &err {
            EgressError::NotConnected
            | EgressError::PermissionDenied { .. }
            | EgressError::SsrfBlocked => Error::forbidden(err.to_string()),
            EgressError::ResourceNotFound => Error::not_found(err.to_string()),
            EgressError::ResourceInactive => Error::conflict(err.to_string()),
            EgressError::RateLimited { retry_after_secs } => {
                Error::rate_limited(err.to_string(), *retry_after_secs as u64)
            }
            EgressError::UrlInvalid { .. }
            | EgressError::UnsupportedMethod { .. }
            | EgressError::BodyTooLarge => Error::validation(err.to_string()),
            EgressError::AuthConfigInvalid => Error::internal(err.to_string()),
            EgressError::Transport { .. } => Error::unavailable(err.to_string()),
        }
    }
}
