//! Vault lifecycle: create, unlock, update, recover, change password
//!
//! Two decryption paths exist for every vault. The password path derives a
//! key with Argon2id and opens the main ciphertext; the recovery path
//! derives a seed from the BIP-39 phrase and opens the recovery ciphertext.
//! Updates made through the password path rewrap the recovery copy so both
//! paths always yield the same document.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use zeroize::Zeroizing;

use ocmt_core::Clock;
use ocmt_crypto::{aead, kdf, mnemonic};

use crate::blob::{
    default_document, EncryptionSection, KdfSection, RecoverySection, VaultBlob, VAULT_FORMAT,
    VAULT_VERSION,
};
use crate::error::{Result, VaultError};

/// The vault engine. Stateless apart from its clock; safe to share.
#[derive(Debug, Clone, Default)]
pub struct VaultEngine {
    clock: Clock,
}

/// A freshly created vault and its one-time recovery phrase
pub struct CreatedVault {
    /// The blob to persist
    pub blob: VaultBlob,
    /// The 12-word phrase, shown to the owner exactly once
    pub recovery_phrase: Zeroizing<String>,
}

/// The result of a successful unlock
pub struct UnlockedVault {
    /// The decrypted document
    pub document: Value,
    /// The password-derived key, for session retention and updates
    pub key: Zeroizing<[u8; 32]>,
    seed: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for UnlockedVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedVault").finish_non_exhaustive()
    }
}

impl VaultEngine {
    /// Engine reading the system clock
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    /// Create a vault for a new owner. The returned phrase is the only
    /// time the recovery seed leaves the process.
    pub fn create(&self, password: &str) -> Result<CreatedVault> {
        let salt = kdf::generate_salt();
        let key = kdf::derive_key(password.as_bytes(), &salt)?;
        let recovery = mnemonic::generate_phrase()?;

        let document = default_document();
        let plaintext = Zeroizing::new(serialize_document(&document)?);

        let main = aead::seal(&key, &plaintext)?;
        let recovery_copy = aead::seal(&recovery.seed, &plaintext)?;
        let sealed_seed = aead::seal(&key, recovery.seed.as_slice())?;

        let now = self.clock.now_secs();
        let blob = VaultBlob {
            format: VAULT_FORMAT.into(),
            version: VAULT_VERSION,
            kdf: KdfSection {
                algorithm: "argon2id".into(),
                memory_kib: kdf::MEMORY_KIB,
                time_cost: kdf::TIME_COST,
                parallelism: kdf::LANES,
                salt: BASE64.encode(salt),
            },
            encryption: encryption_section(&main),
            ciphertext: BASE64.encode(&main.ciphertext),
            recovery: RecoverySection {
                encryption: encryption_section(&recovery_copy),
                ciphertext: BASE64.encode(&recovery_copy.ciphertext),
                seed_encryption: encryption_section(&sealed_seed),
                sealed_seed: BASE64.encode(&sealed_seed.ciphertext),
            },
            created: now,
            updated: now,
        };

        Ok(CreatedVault {
            blob,
            recovery_phrase: recovery.phrase,
        })
    }

    /// Unlock with the owner's password.
    pub fn unlock(&self, blob: &VaultBlob, password: &str) -> Result<UnlockedVault> {
        blob.validate()?;
        let salt = decode_salt(&blob.kdf.salt)?;
        let key = kdf::derive_key(password.as_bytes(), &salt)?;
        self.open_with(blob, key)
    }

    /// Unlock with a key retained by an unlock session, skipping the KDF.
    pub fn unlock_with_key(&self, blob: &VaultBlob, key: &[u8; 32]) -> Result<UnlockedVault> {
        blob.validate()?;
        self.open_with(blob, Zeroizing::new(*key))
    }

    /// Re-encrypt the vault with a new document under a held key, keeping
    /// the recovery path consistent.
    pub fn update(&self, blob: &VaultBlob, key: &[u8; 32], document: &Value) -> Result<VaultBlob> {
        blob.validate()?;
        let seed = self.open_seed(blob, key)?;

        let plaintext = Zeroizing::new(serialize_document(document)?);
        let main = aead::seal(&Zeroizing::new(*key), &plaintext)?;
        let recovery_copy = aead::seal(&seed, &plaintext)?;

        let mut updated = blob.clone();
        updated.encryption = encryption_section(&main);
        updated.ciphertext = BASE64.encode(&main.ciphertext);
        updated.recovery.encryption = encryption_section(&recovery_copy);
        updated.recovery.ciphertext = BASE64.encode(&recovery_copy.ciphertext);
        // Must advance even for two writes inside the same second.
        updated.updated = self.clock.now_secs().max(blob.updated + 1);
        Ok(updated)
    }

    /// Decrypt the document through the recovery path.
    pub fn recover(&self, blob: &VaultBlob, phrase: &str) -> Result<Value> {
        blob.validate()?;
        let seed = mnemonic::seed_from_phrase(phrase)?;
        let nonce = decode_b64(&blob.recovery.encryption.nonce)?;
        let tag = decode_b64(&blob.recovery.encryption.tag)?;
        let ciphertext = decode_b64(&blob.recovery.ciphertext)?;
        let plaintext = Zeroizing::new(aead::open(&seed, &nonce, &ciphertext, &tag)?);
        deserialize_document(&plaintext)
    }

    /// Re-key the vault under a new password. The recovery seed, and with
    /// it the phrase, is preserved.
    pub fn change_password(
        &self,
        blob: &VaultBlob,
        old_password: &str,
        new_password: &str,
    ) -> Result<VaultBlob> {
        let unlocked = self.unlock(blob, old_password)?;

        let salt = kdf::generate_salt();
        let key = kdf::derive_key(new_password.as_bytes(), &salt)?;
        let plaintext = Zeroizing::new(serialize_document(&unlocked.document)?);

        let main = aead::seal(&key, &plaintext)?;
        let recovery_copy = aead::seal(&unlocked.seed, &plaintext)?;
        let sealed_seed = aead::seal(&key, unlocked.seed.as_slice())?;

        let mut rekeyed = blob.clone();
        rekeyed.kdf.salt = BASE64.encode(salt);
        rekeyed.encryption = encryption_section(&main);
        rekeyed.ciphertext = BASE64.encode(&main.ciphertext);
        rekeyed.recovery = RecoverySection {
            encryption: encryption_section(&recovery_copy),
            ciphertext: BASE64.encode(&recovery_copy.ciphertext),
            seed_encryption: encryption_section(&sealed_seed),
            sealed_seed: BASE64.encode(&sealed_seed.ciphertext),
        };
        rekeyed.updated = self.clock.now_secs().max(blob.updated + 1);
        Ok(rekeyed)
    }

    fn open_with(&self, blob: &VaultBlob, key: Zeroizing<[u8; 32]>) -> Result<UnlockedVault> {
        let nonce = decode_b64(&blob.encryption.nonce)?;
        let tag = decode_b64(&blob.encryption.tag)?;
        let ciphertext = decode_b64(&blob.ciphertext)?;
        let plaintext = Zeroizing::new(aead::open(&key, &nonce, &ciphertext, &tag)?);
        let document = deserialize_document(&plaintext)?;
        let seed = self.open_seed(blob, &key)?;
        Ok(UnlockedVault {
            document,
            key,
            seed,
        })
    }

    fn open_seed(&self, blob: &VaultBlob, key: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
        let nonce = decode_b64(&blob.recovery.seed_encryption.nonce)?;
        let tag = decode_b64(&blob.recovery.seed_encryption.tag)?;
        let ciphertext = decode_b64(&blob.recovery.sealed_seed)?;
        let raw = Zeroizing::new(aead::open(
            &Zeroizing::new(*key),
            &nonce,
            &ciphertext,
            &tag,
        )?);
        if raw.len() != 32 {
            return Err(VaultError::InvalidCredentials);
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&raw);
        Ok(seed)
    }
}

fn encryption_section(sealed: &aead::SealedBox) -> EncryptionSection {
    EncryptionSection {
        algorithm: "aes-256-gcm".into(),
        nonce: BASE64.encode(sealed.nonce),
        tag: BASE64.encode(sealed.tag),
    }
}

fn serialize_document(document: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(document).map_err(|_| VaultError::Internal)
}

fn deserialize_document(plaintext: &[u8]) -> Result<Value> {
    serde_json::from_slice(plaintext).map_err(|_| VaultError::InvalidCredentials)
}

fn decode_salt(salt_b64: &str) -> Result<[u8; kdf::SALT_LEN]> {
    let raw = decode_b64(salt_b64)?;
    raw.try_into().map_err(|_| VaultError::Format {
        reason: "salt is not 16 bytes".into(),
    })
}

fn decode_b64(value: &str) -> Result<Vec<u8>> {
    BASE64.decode(value).map_err(|_| VaultError::Format {
        reason: "invalid base64 field".into(),
    })
}
