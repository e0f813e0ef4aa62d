//! Version-tagged cipher store for process secrets
//!
//! Secrets that live outside the vault (permanent gateway tokens, channel
//! auth configs) are stored as `v{N}:{iv_b64}:{tag_b64}:{ct_b64}`, where N
//! names the encryption key that produced them. A legacy colon-separated
//! hex triple (`iv:tag:ct`) is read as version 0.
//!
//! Keys come from the environment once per process: `ENCRYPTION_KEY` is the
//! current key, `ENCRYPTION_KEY_VERSION` its version (default 0), and
//! `ENCRYPTION_KEY_V{n}` any historical keys still needed to read old
//! ciphertexts. Every key is exactly 64 hex characters.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::aead;
use crate::error::{CryptoError, Result};

/// Environment variable holding the current key
pub const ENV_KEY: &str = "ENCRYPTION_KEY";
/// Environment variable holding the current key's version
pub const ENV_KEY_VERSION: &str = "ENCRYPTION_KEY_VERSION";

/// A loaded set of encryption keys indexed by version
pub struct Keyring {
    current_version: u32,
    keys: HashMap<u32, Zeroizing<[u8; 32]>>,
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("current_version", &self.current_version)
            .field("loaded_versions", &self.loaded_versions())
            .finish()
    }
}

/// A parsed ciphertext, either wire format
struct Parsed {
    version: u32,
    nonce: Vec<u8>,
    tag: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl Keyring {
    /// Build a keyring with a single current key.
    pub fn new(current_version: u32, current_key_hex: &str) -> Result<Self> {
        let mut keys = HashMap::new();
        keys.insert(current_version, parse_key_hex(current_key_hex)?);
        Ok(Self {
            current_version,
            keys,
        })
    }

    /// Add a historical key for reading old ciphertexts.
    pub fn with_past_key(mut self, version: u32, key_hex: &str) -> Result<Self> {
        if version >= self.current_version {
            return Err(CryptoError::Config {
                reason: format!(
                    "past key version {version} is not below current {}",
                    self.current_version
                ),
            });
        }
        self.keys.insert(version, parse_key_hex(key_hex)?);
        Ok(self)
    }

    /// Load from the process environment. The current key is required;
    /// historical `ENCRYPTION_KEY_V{n}` entries are optional. A v0 key may
    /// legitimately be absent even when legacy ciphertexts exist; those
    /// fail lazily on first decrypt instead of blocking startup.
    pub fn from_env() -> Result<Self> {
        let current = std::env::var(ENV_KEY).map_err(|_| CryptoError::Config {
            reason: format!("{ENV_KEY} is not set"),
        })?;
        let version: u32 = std::env::var(ENV_KEY_VERSION)
            .ok()
            .map(|v| {
                v.parse().map_err(|_| CryptoError::Config {
                    reason: format!("{ENV_KEY_VERSION} is not an integer"),
                })
            })
            .transpose()?
            .unwrap_or(0);

        let mut ring = Self::new(version, &current)?;
        for past in 0..version {
            if let Ok(key_hex) = std::env::var(format!("ENCRYPTION_KEY_V{past}")) {
                ring = ring.with_past_key(past, &key_hex)?;
            }
        }
        Ok(ring)
    }

    /// The version new ciphertexts are written under
    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Versions this process can decrypt, ascending
    pub fn loaded_versions(&self) -> Vec<u32> {
        let mut versions: Vec<u32> = self.keys.keys().copied().collect();
        versions.sort_unstable();
        versions
    }

    /// Encrypt under the current key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let key = self
            .keys
            .get(&self.current_version)
            .ok_or(CryptoError::KeyVersionUnavailable {
                version: self.current_version,
            })?;
        let sealed = aead::seal(key, plaintext)?;
        Ok(format!(
            "v{}:{}:{}:{}",
            self.current_version,
            BASE64.encode(sealed.nonce),
            BASE64.encode(sealed.tag),
            BASE64.encode(&sealed.ciphertext),
        ))
    }

    /// Decrypt either wire format, resolving the key by parsed version.
    pub fn decrypt(&self, stored: &str) -> Result<Vec<u8>> {
        let parsed = parse(stored)?;
        let key = self
            .keys
            .get(&parsed.version)
            .ok_or(CryptoError::KeyVersionUnavailable {
                version: parsed.version,
            })?;
        aead::open(key, &parsed.nonce, &parsed.ciphertext, &parsed.tag)
    }

    /// Decrypt with whatever key produced `stored`, re-encrypt under the
    /// current key. Used by stored-ciphertext migration sweeps.
    pub fn reencrypt(&self, stored: &str) -> Result<String> {
        let plaintext = Zeroizing::new(self.decrypt(stored)?);
        self.encrypt(&plaintext)
    }

    /// Whether `stored` was written under an older key version.
    pub fn needs_reencryption(&self, stored: &str) -> Result<bool> {
        Ok(parse(stored)?.version < self.current_version)
    }

    /// Produce rotation advice: a fresh key and the environment changes to
    /// apply. Process state is not mutated; operators roll the environment.
    pub fn rotate(&self) -> RotationAdvice {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let new_version = self.current_version + 1;
        let instructions = vec![
            format!("set ENCRYPTION_KEY_V{} to the current ENCRYPTION_KEY", self.current_version),
            format!("set {ENV_KEY} to the new key"),
            format!("set {ENV_KEY_VERSION}={new_version}"),
            "restart, then run the re-encryption sweep".to_string(),
        ];
        RotationAdvice {
            new_key_hex: hex::encode(key),
            new_version,
            instructions,
        }
    }
}

/// Parse the key version out of a stored ciphertext (legacy = 0).
pub fn key_version(stored: &str) -> Result<u32> {
    Ok(parse(stored)?.version)
}

/// Rotation advice returned by [`Keyring::rotate`]
#[derive(Debug, Clone)]
pub struct RotationAdvice {
    /// Freshly generated key, 64 hex characters
    pub new_key_hex: String,
    /// Version the new key should be installed under
    pub new_version: u32,
    /// Operator steps to apply the rotation
    pub instructions: Vec<String>,
}

fn parse_key_hex(key_hex: &str) -> Result<Zeroizing<[u8; 32]>> {
    if key_hex.len() != 64 {
        return Err(CryptoError::KeyLength);
    }
    let bytes = hex::decode(key_hex).map_err(|_| CryptoError::KeyLength)?;
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn parse(stored: &str) -> Result<Parsed> {
    let parts: Vec<&str> = stored.split(':').collect();
    match parts.as_slice() {
        [version_tag, iv, tag, ct] => {
            let version: u32 = version_tag
                .strip_prefix('v')
                .and_then(|v| v.parse().ok())
                .ok_or(CryptoError::Format)?;
            Ok(Parsed {
                version,
                nonce: BASE64.decode(iv).map_err(|_| CryptoError::Format)?,
                tag: BASE64.decode(tag).map_err(|_| CryptoError::Format)?,
                ciphertext: BASE64.decode(ct).map_err(|_| CryptoError::Format)?,
            })
        }
        // Legacy pre-versioning format: hex iv:tag:ct, implicitly v0.
        [iv, tag, ct] => Ok(Parsed {
            version: 0,
            nonce: hex::decode(iv).map_err(|_| CryptoError::Format)?,
            tag: hex::decode(tag).map_err(|_| CryptoError::Format)?,
            ciphertext: hex::decode(ct).map_err(|_| CryptoError::Format)?,
        }),
        _ => Err(CryptoError::Format),
    }
}

// === Process-global keyring ===

static GLOBAL: Lazy<RwLock<Option<Arc<Keyring>>>> = Lazy::new(|| RwLock::new(None));

/// The process-global keyring, loaded from the environment on first use.
pub fn global() -> Result<Arc<Keyring>> {
    if let Some(ring) = GLOBAL.read().as_ref() {
        return Ok(Arc::clone(ring));
    }
    let mut slot = GLOBAL.write();
    // Another caller may have raced us here.
    if let Some(ring) = slot.as_ref() {
        return Ok(Arc::clone(ring));
    }
    let ring = Arc::new(Keyring::from_env()?);
    *slot = Some(Arc::clone(&ring));
    Ok(ring)
}

/// Drop the cached global keyring so the next access reloads it. Testing only.
pub fn reset_global() {
    *GLOBAL.write() = None;
}
