//! # OCMT Vault
//!
//! The per-owner encrypted blob. The control plane never stores vault
//! plaintext or password-derived keys; a derived key exists only inside an
//! authenticated unlock session, and the recovery seed leaves the process
//! exactly once, as the BIP-39 phrase shown at creation.
//!
//! Unlock failures are a single opaque error regardless of cause.

#![forbid(unsafe_code)]

pub mod blob;
pub mod engine;
pub mod error;
pub mod session;

pub use blob::{default_document, EncryptionSection, KdfSection, RecoverySection, VaultBlob};
pub use engine::{CreatedVault, UnlockedVault, VaultEngine};
pub use error::{Result, VaultError};
pub use session::VaultSessions;
