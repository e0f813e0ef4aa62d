//! HMAC-SHA256 signing and constant-time verification

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `message`.
pub fn hmac_sign(key: &[u8], message: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;
    mac.update(message);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Verify a signature in constant time.
pub fn hmac_verify(key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
    let expected = hmac_sign(key, message)?;
    if signature.len() != expected.len() {
        return Ok(false);
    }
    Ok(expected.ct_eq(signature).into())
}
