//! The self-describing vault blob
//!
//! A vault is a format-versioned JSON record. Two independent ciphertexts
//! hold the same plaintext document: the main one under the password-derived
//! key, the recovery one under the BIP-39 seed. The seed itself rides along
//! wrapped under the password-derived key, so an update made with the
//! password path can keep the recovery path consistent.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, VaultError};

/// The `format` discriminator every vault blob carries
pub const VAULT_FORMAT: &str = "ocmt-vault";
/// The only blob version this engine reads or writes
pub const VAULT_VERSION: u32 = 1;

/// KDF parameters recorded with the blob so old vaults stay readable if
/// the platform defaults ever move
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfSection {
    /// Always `argon2id`
    pub algorithm: String,
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Iteration count
    pub time_cost: u32,
    /// Degree of parallelism
    pub parallelism: u32,
    /// Base64-encoded 16-byte salt
    pub salt: String,
}

/// AEAD parameters for one ciphertext
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionSection {
    /// Always `aes-256-gcm`
    pub algorithm: String,
    /// Base64-encoded 12-byte nonce
    pub nonce: String,
    /// Base64-encoded 16-byte tag
    pub tag: String,
}

/// The recovery path: document under the seed, seed under the password key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoverySection {
    /// AEAD parameters for the seed-encrypted document copy
    pub encryption: EncryptionSection,
    /// Base64 ciphertext of the document under the recovery seed
    pub ciphertext: String,
    /// AEAD parameters for the wrapped seed
    pub seed_encryption: EncryptionSection,
    /// Base64 ciphertext of the seed under the password-derived key
    pub sealed_seed: String,
}

/// A complete vault record as stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultBlob {
    /// Format discriminator, [`VAULT_FORMAT`]
    pub format: String,
    /// Blob format version, [`VAULT_VERSION`]
    pub version: u32,
    /// Password KDF parameters
    pub kdf: KdfSection,
    /// AEAD parameters for the main ciphertext
    pub encryption: EncryptionSection,
    /// Base64 ciphertext of the document under the password-derived key
    pub ciphertext: String,
    /// Recovery path
    pub recovery: RecoverySection,
    /// Unix seconds at creation
    pub created: i64,
    /// Unix seconds at last write
    pub updated: i64,
}

impl VaultBlob {
    /// Structural validation: format tag, version, algorithm names.
    pub fn validate(&self) -> Result<()> {
        if self.format != VAULT_FORMAT {
            return Err(VaultError::Format {
                reason: format!("format is {:?}, expected {VAULT_FORMAT:?}", self.format),
            });
        }
        if self.version != VAULT_VERSION {
            return Err(VaultError::Format {
                reason: format!("version {} is not supported", self.version),
            });
        }
        if self.kdf.algorithm != "argon2id" {
            return Err(VaultError::Format {
                reason: format!("kdf algorithm {:?} is not supported", self.kdf.algorithm),
            });
        }
        if self.encryption.algorithm != "aes-256-gcm" {
            return Err(VaultError::Format {
                reason: format!(
                    "encryption algorithm {:?} is not supported",
                    self.encryption.algorithm
                ),
            });
        }
        Ok(())
    }
}

/// The plaintext document a fresh vault holds
pub fn default_document() -> Value {
    json!({
        "integrations": {},
        "memory": { "preferences": {}, "facts": [] },
        "conversations": [],
        "files": [],
    })
}
