//! Dedup keys
//!
//! A dedup key names an alert-worthy situation: same event type, same
//! owner, same group, same source IP. Cooldowns and threshold counting
//! both key on it.

use sha2::{Digest, Sha256};

use ocmt_core::{GroupId, OwnerId};

/// Derive the dedup key: the first 16 bytes of
/// `SHA-256(event_type | owner | group | ip)`, hex-encoded (32 chars).
pub fn dedup_key(
    event_type: &str,
    owner: Option<OwnerId>,
    group: Option<GroupId>,
    ip: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_type.as_bytes());
    hasher.update(b"|");
    hasher.update(owner.map(|o| o.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(group.map(|g| g.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(ip.unwrap_or_default().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}
