//! Token error surface

/// Convenience result alias for token operations
pub type Result<T> = std::result::Result<T, TokenError>;

/// Errors surfaced by token issuance and storage. Validation never errors;
/// it returns `None` with no reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// HMAC signing failed
    #[error("token signing failed")]
    Signing,

    /// Sealing or opening a stored permanent token failed
    #[error("permanent token storage failed")]
    Storage,
}

impl From<TokenError> for ocmt_core::Error {
    fn from(err: TokenError) -> Self {
        ocmt_core::Error::internal(err.to_string())
    }
}
