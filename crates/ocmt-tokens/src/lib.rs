//! # OCMT Tokens
//!
//! The gateway token plane. An owner holds one long-lived permanent token,
//! stored only as versioned ciphertext. Every container ⇄ control-plane hop
//! authenticates with a short-lived ephemeral token derived from it:
//! HMAC-signed, self-describing, and validatable statelessly in O(1) with
//! no database round-trip. A leaked ephemeral token expires on its own.

#![forbid(unsafe_code)]

pub mod ephemeral;
pub mod error;
pub mod permanent;

pub use ephemeral::{
    EphemeralPayload, TokenService, MAX_TTL_SECS, MIN_TTL_SECS, REFRESH_THRESHOLD_SECS,
};
pub use error::{Result, TokenError};
pub use permanent::{generate_permanent, open_permanent, seal_permanent};

/// What kind of gateway token a string looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// 64 hex characters: a permanent token
    Permanent,
    /// Parses as the signed ephemeral JSON shape
    Ephemeral,
    /// Neither
    Unknown,
}

/// Classify a presented token without validating it.
pub fn classify(token: &str) -> TokenKind {
    if permanent::is_permanent_shape(token) {
        TokenKind::Permanent
    } else if ephemeral::is_ephemeral_shape(token) {
        TokenKind::Ephemeral
    } else {
        TokenKind::Unknown
    }
}
