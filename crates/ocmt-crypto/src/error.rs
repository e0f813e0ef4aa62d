//! Crypto error surface
//!
//! Sensitive material never appears in `Display` or `Debug` output, and
//! authentication failures are deliberately indistinguishable from one
//! another.

/// Convenience result alias for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors surfaced by the crypto layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// AEAD tag verification failed, or the key was wrong. The two cases
    /// are never distinguished.
    #[error("authentication failed")]
    Authentication,

    /// A key was not 32 bytes / 64 hex characters
    #[error("invalid key length")]
    KeyLength,

    /// A ciphertext did not parse as either wire format
    #[error("malformed ciphertext")]
    Format,

    /// The ciphertext references a key version this process has not loaded
    #[error("key version {version} not available")]
    KeyVersionUnavailable {
        /// Version parsed from the ciphertext
        version: u32,
    },

    /// A recovery phrase failed BIP-39 validation
    #[error("invalid recovery phrase")]
    Mnemonic,

    /// Argon2id rejected its parameters or inputs
    #[error("key derivation failed")]
    Kdf,

    /// Keyring configuration was missing or malformed at load
    #[error("keyring configuration invalid: {reason}")]
    Config {
        /// What was wrong, without echoing key material
        reason: String,
    },
}

impl From<CryptoError> for ocmt_core::Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication | CryptoError::Mnemonic => ocmt_core::Error::auth_invalid(),
            CryptoError::KeyVersionUnavailable { .. } | CryptoError::Config { .. } => {
                ocmt_core::Error::unavailable(err.to_string())
            }
            CryptoError::KeyLength | CryptoError::Format => {
                ocmt_core::Error::validation(err.to_string())
            }
            CryptoError::Kdf => ocmt_core::Error::internal("key derivation failed"),
        }
    }
}
