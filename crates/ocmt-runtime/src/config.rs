//! Runtime configuration from the environment
//!
//! Encryption keys are loaded by the crypto keyring itself; everything
//! else the control plane needs arrives through the `OCMT_*` variables
//! read here. Absent optional values degrade features (no redis → local
//! rate limiting, no mailer → email channel skipped) rather than failing
//! startup.

use ocmt_core::{Error, Result};

/// External mailer credentials
#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// HTTP endpoint messages are enqueued to
    pub endpoint: String,
    /// Bearer credential for the mailer API
    pub api_key: String,
    /// From address
    pub from: String,
}

/// Everything the runtime reads from the environment
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Shared-cache URL for distributed rate limiting
    pub redis_url: Option<String>,
    /// CIDRs whose forwarding headers are trusted
    pub trusted_proxy_cidrs: Vec<String>,
    /// Deployment region identifier
    pub region: Option<String>,
    /// Default per-window request limit for unplanned identities
    pub default_rate_limit: u32,
    /// Rate-limit window width in seconds
    pub rate_limit_window_secs: i64,
    /// Mailer credentials, when email alerting is configured
    pub mailer: Option<MailerConfig>,
    /// Whether error details are suppressed on external surfaces
    pub production: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            trusted_proxy_cidrs: Vec::new(),
            region: None,
            default_rate_limit: 100,
            rate_limit_window_secs: 60,
            mailer: None,
            production: false,
        }
    }
}

impl RuntimeConfig {
    /// Read the `OCMT_*` environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.redis_url = optional("OCMT_REDIS_URL");
        config.region = optional("OCMT_REGION");
        config.production = optional("OCMT_ENV").as_deref() == Some("production");

        if let Some(cidrs) = optional("OCMT_TRUSTED_PROXY_CIDRS") {
            config.trusted_proxy_cidrs = cidrs
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(raw) = optional("OCMT_RATE_LIMIT_DEFAULT") {
            config.default_rate_limit = raw
                .parse()
                .map_err(|_| Error::validation("OCMT_RATE_LIMIT_DEFAULT is not an integer"))?;
        }

        config.mailer = match (
            optional("OCMT_MAILER_ENDPOINT"),
            optional("OCMT_MAILER_API_KEY"),
        ) {
            (Some(endpoint), Some(api_key)) => Some(MailerConfig {
                endpoint,
                api_key,
                from: optional("OCMT_MAILER_FROM")
                    .unwrap_or_else(|| "alerts@ocmt.invalid".to_string()),
            }),
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::validation(
                    "mailer configuration requires both OCMT_MAILER_ENDPOINT and OCMT_MAILER_API_KEY",
                ))
            }
            (None, None) => None,
        };

        Ok(config)
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
