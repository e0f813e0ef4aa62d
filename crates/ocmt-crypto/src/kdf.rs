//! Argon2id password-based key derivation
//!
//! Parameters are fixed platform-wide: 64 MiB memory, 3 passes, 4 lanes,
//! 32-byte output. Changing them changes every stored vault, so they are
//! constants rather than configuration.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Salt length in bytes
pub const SALT_LEN: usize = 16;
/// Memory cost in KiB
pub const MEMORY_KIB: u32 = 65_536;
/// Iteration count
pub const TIME_COST: u32 = 3;
/// Degree of parallelism
pub const LANES: u32 = 4;

/// Derive a 32-byte key from a password and salt.
pub fn derive_key(password: &[u8], salt: &[u8; SALT_LEN]) -> Result<Zeroizing<[u8; 32]>> {
    let params =
        Params::new(MEMORY_KIB, TIME_COST, LANES, Some(32)).map_err(|_| CryptoError::Kdf)?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(password, salt, key.as_mut())
        .map_err(|_| CryptoError::Kdf)?;
    Ok(key)
}

/// Generate a random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
