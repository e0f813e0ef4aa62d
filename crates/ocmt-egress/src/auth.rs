//! Outbound auth injection
//!
//! A resource's auth configuration is a tagged variant decrypted from the
//! keyring at call time; each variant knows how to encode itself onto the
//! outgoing request.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Where an API key goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyPlacement {
    /// As a request header
    #[default]
    Header,
    /// As a query-string parameter
    Query,
}

/// How to authenticate against a resource endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// `Authorization: Bearer {token}`
    Bearer {
        /// The bearer token
        token: String,
    },
    /// A named header or query parameter
    ApiKey {
        /// Header or query-parameter name
        name: String,
        /// The key value
        key: String,
        /// Header or query placement
        #[serde(default)]
        placement: ApiKeyPlacement,
    },
    /// `Authorization: Basic base64(user:pass)`
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
    },
}

impl AuthConfig {
    /// Encode this auth onto a header/query pair collection.
    pub fn apply(&self, headers: &mut Vec<(String, String)>, query: &mut Vec<(String, String)>) {
        match self {
            AuthConfig::Bearer { token } => {
                headers.push(("authorization".into(), format!("Bearer {token}")));
            }
            AuthConfig::ApiKey {
                name,
                key,
                placement,
            } => match placement {
                ApiKeyPlacement::Header => headers.push((name.clone(), key.clone())),
                ApiKeyPlacement::Query => query.push((name.clone(), key.clone())),
            },
            AuthConfig::Basic { username, password } => {
                let credentials = BASE64.encode(format!("{username}:{password}"));
                headers.push(("authorization".into(), format!("Basic {credentials}")));
            }
        }
    }
}
