//! BIP-39 recovery phrases
//!
//! Recovery seeds are serialized to the user exactly once, as a 12-word
//! English mnemonic (128 bits of entropy). The seed is the first 32 bytes
//! of the standard BIP-39 PBKDF2-SHA512 output with an empty passphrase.

use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Entropy behind a 12-word phrase, in bytes
pub const ENTROPY_LEN: usize = 16;

/// A generated recovery phrase together with its derived seed
pub struct RecoveryPhrase {
    /// The 12-word mnemonic, shown to the owner exactly once
    pub phrase: Zeroizing<String>,
    /// 32-byte seed derived from the phrase
    pub seed: Zeroizing<[u8; 32]>,
}

/// Generate a fresh phrase from 128 bits of OS entropy.
pub fn generate_phrase() -> Result<RecoveryPhrase> {
    let mut entropy = Zeroizing::new([0u8; ENTROPY_LEN]);
    OsRng.fill_bytes(entropy.as_mut());
    seed_from_entropy(&entropy)
}

/// Derive the phrase and seed for caller-provided entropy.
pub fn seed_from_entropy(entropy: &[u8; ENTROPY_LEN]) -> Result<RecoveryPhrase> {
    let mnemonic =
        Mnemonic::from_entropy_in(Language::English, entropy).map_err(|_| CryptoError::Mnemonic)?;
    let seed = seed_of(&mnemonic);
    Ok(RecoveryPhrase {
        phrase: Zeroizing::new(mnemonic.to_string()),
        seed,
    })
}

/// Validate a phrase and recover its seed.
pub fn seed_from_phrase(phrase: &str) -> Result<Zeroizing<[u8; 32]>> {
    let normalized = phrase.trim().to_lowercase();
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|_| CryptoError::Mnemonic)?;
    Ok(seed_of(&mnemonic))
}

fn seed_of(mnemonic: &Mnemonic) -> Zeroizing<[u8; 32]> {
    let full = Zeroizing::new(mnemonic.to_seed(""));
    let mut seed = Zeroizing::new([0u8; 32]);
    seed.copy_from_slice(&full[..32]);
    seed
}
