//! Vault error surface

/// Convenience result alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors surfaced by the vault engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    /// Wrong password, wrong key, wrong phrase, or tampered ciphertext.
    /// Deliberately one variant: the engine is not an oracle.
    #[error("invalid password or key")]
    InvalidCredentials,

    /// The blob is not an `ocmt-vault` version-1 record
    #[error("unsupported vault format: {reason}")]
    Format {
        /// What failed structurally (never key material)
        reason: String,
    },

    /// Anything else; message stays generic
    #[error("vault operation failed")]
    Internal,
}

impl From<ocmt_crypto::CryptoError> for VaultError {
    fn from(err: ocmt_crypto::CryptoError) -> Self {
        match err {
            // Every decrypt/KDF/phrase failure collapses into the single
            // opaque variant.
            ocmt_crypto::CryptoError::Authentication
            | ocmt_crypto::CryptoError::Mnemonic
            | ocmt_crypto::CryptoError::KeyLength => VaultError::InvalidCredentials,
            _ => VaultError::Internal,
        }
    }
}

impl From<VaultError> for ocmt_core::Error {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::InvalidCredentials => ocmt_core::Error::auth_invalid(),
            VaultError::Format { reason } => ocmt_core::Error::validation(reason),
            VaultError::Internal => ocmt_core::Error::internal("vault operation failed"),
        }
    }
}
