//! Alert severity levels
//!
//! Severity ordering gates alert fan-out: a rule only fires when the event
//! severity is at or above the rule's threshold.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of an alert-worthy event, ordered debug < info < warning < critical
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Diagnostic noise; never fans out by default
    Debug,
    /// Informational events
    #[default]
    Info,
    /// Something needs attention soon
    Warning,
    /// Something needs attention now
    Critical,
}

impl Severity {
    /// Hex color used when shaping channel payloads
    pub fn color(&self) -> &'static str {
        match self {
            Severity::Critical => "#dc2626",
            Severity::Warning => "#f59e0b",
            Severity::Debug | Severity::Info => "#6366f1",
        }
    }

    /// Wire name of this severity
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(crate::Error::validation(format!(
                "unknown severity: {other}"
            ))),
        }
    }
}
