//! Permanent gateway tokens
//!
//! A permanent token is 32 random bytes, hex-encoded, and never persisted
//! in the clear: at rest it lives as a versioned ciphertext produced by the
//! keyring. It doubles as the HMAC signing key for ephemeral tokens.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use ocmt_crypto::Keyring;

use crate::error::{Result, TokenError};

/// Generate a fresh permanent token (64 hex characters).
pub fn generate_permanent() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Whether a string has the permanent-token shape.
pub fn is_permanent_shape(token: &str) -> bool {
    token.len() == 64 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Encrypt a permanent token for storage.
pub fn seal_permanent(keyring: &Keyring, raw: &str) -> Result<String> {
    keyring.encrypt(raw.as_bytes()).map_err(|_| TokenError::Storage)
}

/// Decrypt a stored permanent token.
pub fn open_permanent(keyring: &Keyring, stored: &str) -> Result<Zeroizing<String>> {
    let raw = keyring.decrypt(stored).map_err(|_| TokenError::Storage)?;
    String::from_utf8(raw)
        .map(Zeroizing::new)
        .map_err(|_| TokenError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0303030303030303030303030303030303030303030303030303030303030303";

    #[test]
    fn generated_tokens_look_permanent() {
        let token = generate_permanent();
        assert!(is_permanent_shape(&token));
        assert_ne!(token, generate_permanent());
    }

    #[test]
    fn shape_check_rejects_near_misses() {
        assert!(!is_permanent_shape(&"a".repeat(63)));
        assert!(!is_permanent_shape(&"a".repeat(65)));
        assert!(!is_permanent_shape(&"g".repeat(64)));
    }

    #[test]
    fn seal_open_round_trip() {
        let keyring = Keyring::new(0, KEY).unwrap();
        let raw = generate_permanent();
        let stored = seal_permanent(&keyring, &raw).unwrap();
        assert_ne!(stored, raw);
        assert_eq!(*open_permanent(&keyring, &stored).unwrap(), raw);
    }
}
