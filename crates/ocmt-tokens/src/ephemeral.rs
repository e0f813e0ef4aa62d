//! Ephemeral gateway tokens
//!
//! Wire format: URL-safe base64 of the UTF-8 JSON
//! `{"payload":{"userId":…,"exp":…,"nonce":…},"signature":…}` where the
//! signature is HMAC-SHA256 over the canonical payload JSON, keyed by the
//! owner's permanent token. Canonical means the exact serialization this
//! module produces: object keys in the order `userId, exp, nonce`, no
//! whitespace. Validation recomputes it from the parsed payload, so the
//! field order of [`EphemeralPayload`] is part of the wire contract.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use ocmt_core::{Clock, OwnerId};
use ocmt_crypto::{hmac_sign, hmac_verify};

use crate::error::{Result, TokenError};

/// Shortest lifetime an ephemeral token may be issued with
pub const MIN_TTL_SECS: i64 = 300;
/// Longest lifetime an ephemeral token may be issued with
pub const MAX_TTL_SECS: i64 = 86_400;
/// Default remaining-lifetime threshold for refresh advice
pub const REFRESH_THRESHOLD_SECS: i64 = 300;

/// The signed portion of an ephemeral token.
///
/// Field order is load-bearing; see the module docs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralPayload {
    /// Owner the token authenticates
    #[serde(rename = "userId")]
    pub user_id: OwnerId,
    /// Expiry, Unix seconds
    pub exp: i64,
    /// 8 random bytes, hex-encoded
    pub nonce: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EphemeralToken {
    payload: EphemeralPayload,
    signature: String,
}

/// Issues and validates ephemeral tokens
#[derive(Debug, Clone, Default)]
pub struct TokenService {
    clock: Clock,
}

impl TokenService {
    /// Service reading the given clock
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    /// Issue a token for `owner`, signed by their permanent token. The ttl
    /// is clamped into `[MIN_TTL_SECS, MAX_TTL_SECS]`.
    pub fn issue(&self, owner: OwnerId, permanent: &str, ttl_secs: i64) -> Result<String> {
        let ttl = ttl_secs.clamp(MIN_TTL_SECS, MAX_TTL_SECS);

        let mut nonce = [0u8; 8];
        OsRng.fill_bytes(&mut nonce);

        let payload = EphemeralPayload {
            user_id: owner,
            exp: self.clock.now_secs() + ttl,
            nonce: hex::encode(nonce),
        };
        let canonical = canonical_payload(&payload)?;
        let signature = hmac_sign(permanent.as_bytes(), canonical.as_bytes())
            .map_err(|_| TokenError::Signing)?;

        let token = EphemeralToken {
            payload,
            signature: hex::encode(signature),
        };
        let json = serde_json::to_vec(&token).map_err(|_| TokenError::Signing)?;
        Ok(URL_SAFE.encode(json))
    }

    /// Validate statelessly against the owner's permanent token. Returns
    /// the payload on success and `None` otherwise; expired, forged,
    /// malformed, and wrongly keyed tokens are indistinguishable.
    pub fn validate(&self, token: &str, permanent: &str) -> Option<EphemeralPayload> {
        let parsed = decode(token)?;
        let canonical = canonical_payload(&parsed.payload).ok()?;
        let signature = hex::decode(&parsed.signature).ok()?;
        let genuine =
            hmac_verify(permanent.as_bytes(), canonical.as_bytes(), &signature).ok()?;
        if !genuine {
            return None;
        }
        if parsed.payload.exp <= self.clock.now_secs() {
            return None;
        }
        Some(parsed.payload)
    }

    /// Seconds until expiry, without verifying the signature. `None` when
    /// the token does not parse.
    pub fn expires_in(&self, token: &str) -> Option<i64> {
        let parsed = decode(token)?;
        Some(parsed.payload.exp - self.clock.now_secs())
    }

    /// Whether the remaining lifetime is below `threshold_secs`.
    /// Unparseable tokens always want a refresh.
    pub fn needs_refresh(&self, token: &str, threshold_secs: i64) -> bool {
        match self.expires_in(token) {
            Some(remaining) => remaining < threshold_secs,
            None => true,
        }
    }
}

/// Whether a string parses as the ephemeral token shape.
pub fn is_ephemeral_shape(token: &str) -> bool {
    decode(token).is_some()
}

fn canonical_payload(payload: &EphemeralPayload) -> Result<String> {
    serde_json::to_string(payload).map_err(|_| TokenError::Signing)
}

// Both base64 alphabets are accepted; issuance always uses URL-safe.
fn decode(token: &str) -> Option<EphemeralToken> {
    let raw = URL_SAFE
        .decode(token)
        .or_else(|_| STANDARD.decode(token))
        .ok()?;
    serde_json::from_slice(&raw).ok()
}
