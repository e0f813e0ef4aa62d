//! # OCMT Crypto
//!
//! Cryptographic primitives for the control plane: AES-256-GCM sealing,
//! Argon2id password derivation, BIP-39 recovery phrases, HMAC-SHA256
//! signing, and the version-tagged cipher store used for process secrets.
//!
//! Failure hygiene: decryption and verification failures collapse into a
//! single opaque [`CryptoError::Authentication`] so callers cannot tell a
//! wrong key from tampered ciphertext.

#![forbid(unsafe_code)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keyring;
pub mod mac;
pub mod mnemonic;

pub use aead::{open, seal, SealedBox, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use error::{CryptoError, Result};
pub use kdf::{derive_key, generate_salt, SALT_LEN};
pub use keyring::{key_version, Keyring, RotationAdvice};
pub use mac::{hmac_sign, hmac_verify};
pub use mnemonic::{generate_phrase, seed_from_entropy, seed_from_phrase, RecoveryPhrase};
