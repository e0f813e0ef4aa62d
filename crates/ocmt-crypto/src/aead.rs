//! AES-256-GCM sealing with detached tags
//!
//! Every seal draws a fresh random nonce; the nonce is returned alongside
//! the ciphertext and tag and must be stored with them. Nonces are never
//! derived or reused.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, Result};

/// AEAD key length in bytes
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Output of a seal operation: nonce, ciphertext, and detached tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    /// Randomly generated 12-byte nonce
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// 16-byte authentication tag
    pub tag: [u8; TAG_LEN],
}

/// Encrypt `plaintext` under `key` with a freshly generated nonce.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<SealedBox> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut combined = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Authentication)?;

    // aes-gcm appends the tag; detach it so callers store it explicitly.
    let split_at = combined.len() - TAG_LEN;
    let tag_bytes = combined.split_off(split_at);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);

    Ok(SealedBox {
        nonce,
        ciphertext: combined,
        tag,
    })
}

/// Decrypt and verify. Any failure (wrong key, wrong nonce, tampered
/// ciphertext or tag) reports the same opaque error.
pub fn open(key: &[u8; KEY_LEN], nonce: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(CryptoError::Authentication);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::from_slice(nonce), combined.as_slice())
        .map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    #[test]
    fn seal_open_round_trip() {
        let key = test_key(7);
        let sealed = seal(&key, b"attack at dawn").unwrap();
        let plain = open(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag).unwrap();
        assert_eq!(plain, b"attack at dawn");
    }

    #[test]
    fn wrong_key_fails_opaquely() {
        let sealed = seal(&test_key(1), b"secret").unwrap();
        let err = open(&test_key(2), &sealed.nonce, &sealed.ciphertext, &sealed.tag).unwrap_err();
        assert_eq!(err, CryptoError::Authentication);
    }

    #[test]
    fn tampered_tag_fails_identically_to_wrong_key() {
        let key = test_key(3);
        let mut sealed = seal(&key, b"secret").unwrap();
        sealed.tag[0] ^= 0xff;
        let err = open(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag).unwrap_err();
        assert_eq!(err, CryptoError::Authentication);
    }

    #[test]
    fn nonces_differ_across_seals() {
        let key = test_key(4);
        let a = seal(&key, b"x").unwrap();
        let b = seal(&key, b"x").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    proptest! {
        #[test]
        fn round_trip_for_arbitrary_plaintexts(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let key = test_key(9);
            let sealed = seal(&key, &plaintext).unwrap();
            let opened = open(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag).unwrap();
            prop_assert_eq!(opened, plaintext);
        }

        #[test]
        fn cross_key_decryption_always_fails(
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
            k1 in any::<u8>(),
            k2 in any::<u8>(),
        ) {
            prop_assume!(k1 != k2);
            let sealed = seal(&test_key(k1), &plaintext).unwrap();
            prop_assert!(open(&test_key(k2), &sealed.nonce, &sealed.ciphertext, &sealed.tag).is_err());
        }
    }
}
