//! Short-lived unlock sessions
//!
//! A successful unlock parks the derived key in memory under a random
//! session token so follow-up requests can skip the KDF. One live session
//! per owner: an explicit unlock rotates the token and revokes the old
//! one. Entries expire on their own and a periodic reaper clears them.

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use ocmt_core::{Clock, OwnerId};

/// Default session lifetime in seconds
pub const DEFAULT_TTL_SECS: i64 = 15 * 60;

struct SessionEntry {
    owner: OwnerId,
    key: Zeroizing<[u8; 32]>,
    expires_at: i64,
}

/// Concurrent registry of unlocked-vault sessions
pub struct VaultSessions {
    sessions: DashMap<String, SessionEntry>,
    by_owner: DashMap<OwnerId, String>,
    clock: Clock,
    ttl_secs: i64,
}

impl VaultSessions {
    /// Registry with the default TTL
    pub fn new(clock: Clock) -> Self {
        Self::with_ttl(clock, DEFAULT_TTL_SECS)
    }

    /// Registry with a custom TTL
    pub fn with_ttl(clock: Clock, ttl_secs: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            by_owner: DashMap::new(),
            clock,
            ttl_secs,
        }
    }

    /// Park a derived key for an owner, returning the session token.
    /// Any previous session for the owner is revoked.
    pub fn insert(&self, owner: OwnerId, key: Zeroizing<[u8; 32]>) -> String {
        let mut token_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);

        if let Some((_, old_token)) = self.by_owner.remove(&owner) {
            self.sessions.remove(&old_token);
        }
        self.sessions.insert(
            token.clone(),
            SessionEntry {
                owner,
                key,
                expires_at: self.clock.now_secs() + self.ttl_secs,
            },
        );
        self.by_owner.insert(owner, token.clone());
        token
    }

    /// Fetch the key for a live session. The owner must match the one the
    /// session was created for; a miss never says why.
    pub fn get(&self, token: &str, owner: OwnerId) -> Option<Zeroizing<[u8; 32]>> {
        let entry = self.sessions.get(token)?;
        if entry.owner != owner || entry.expires_at <= self.clock.now_secs() {
            return None;
        }
        Some(entry.key.clone())
    }

    /// Drop a session explicitly (lock, logout).
    pub fn revoke(&self, token: &str) {
        if let Some((_, entry)) = self.sessions.remove(token) {
            self.by_owner.remove(&entry.owner);
        }
    }

    /// Remove expired sessions; returns how many were dropped.
    pub fn reap_expired(&self) -> usize {
        let now = self.clock.now_secs();
        let expired: Vec<(String, OwnerId)> = self
            .sessions
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| (entry.key().clone(), entry.owner))
            .collect();
        for (token, owner) in &expired {
            self.sessions.remove(token);
            self.by_owner.remove(owner);
        }
        expired.len()
    }

    /// Number of live sessions (expired-but-unreaped included)
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are held
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Zeroizing<[u8; 32]> {
        Zeroizing::new([byte; 32])
    }

    #[test]
    fn insert_then_get() {
        let (clock, _) = Clock::manual(0);
        let sessions = VaultSessions::new(clock);
        let owner = OwnerId::new();
        let token = sessions.insert(owner, key(1));
        assert_eq!(*sessions.get(&token, owner).unwrap(), [1u8; 32]);
    }

    #[test]
    fn wrong_owner_is_a_silent_miss() {
        let (clock, _) = Clock::manual(0);
        let sessions = VaultSessions::new(clock);
        let token = sessions.insert(OwnerId::new(), key(1));
        assert!(sessions.get(&token, OwnerId::new()).is_none());
    }

    #[test]
    fn re_unlock_rotates_the_token() {
        let (clock, _) = Clock::manual(0);
        let sessions = VaultSessions::new(clock);
        let owner = OwnerId::new();
        let first = sessions.insert(owner, key(1));
        let second = sessions.insert(owner, key(2));
        assert_ne!(first, second);
        assert!(sessions.get(&first, owner).is_none());
        assert_eq!(*sessions.get(&second, owner).unwrap(), [2u8; 32]);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn sessions_expire_and_reap() {
        let (clock, time) = Clock::manual(0);
        let sessions = VaultSessions::with_ttl(clock, 60);
        let owner = OwnerId::new();
        let token = sessions.insert(owner, key(1));

        time.advance_secs(61);
        assert!(sessions.get(&token, owner).is_none());
        assert_eq!(sessions.reap_expired(), 1);
        assert!(sessions.is_empty());
    }
}
