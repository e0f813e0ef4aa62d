//! Alert events, rules, and history rows

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ocmt_core::{GroupId, OwnerId, RuleId, Severity};

use crate::channel::AlertChannel;

/// An alert-worthy occurrence reported by some subsystem
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// Event type, e.g. `capability.issued` or `vault.unlock_failed`
    pub event_type: String,
    /// Owner the event concerns, when known
    pub owner: Option<OwnerId>,
    /// Group the event concerns, when known
    pub group: Option<GroupId>,
    /// Short human headline
    pub title: String,
    /// Longer human description
    pub message: String,
    /// Explicit severity; otherwise the event-type default applies
    pub severity: Option<Severity>,
    /// Free-form context; `metadata.ip` participates in the dedup key
    pub metadata: Value,
}

impl AlertEvent {
    /// The `ip` metadata field, when present
    pub fn ip(&self) -> Option<&str> {
        self.metadata.get("ip").and_then(Value::as_str)
    }
}

/// A fan-out rule matched by `(owner?, group?, event_type)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule identifier
    pub id: RuleId,
    /// Restrict to one owner, or match any
    pub owner: Option<OwnerId>,
    /// Restrict to one group, or match any
    pub group: Option<GroupId>,
    /// Event type this rule fires for
    pub event_type: String,
    /// Minimum severity that fans out
    pub severity_threshold: Severity,
    /// Occurrences required inside the window before fan-out
    pub threshold_count: u32,
    /// Width of the threshold window in minutes
    pub threshold_window_minutes: i64,
    /// Quiet period after a fan-out, in minutes
    pub cooldown_minutes: i64,
    /// Channels to dispatch on
    pub channels: Vec<AlertChannel>,
}

impl AlertRule {
    /// The rule synthesized when no stored rule matches an event.
    pub fn default_for(event_type: &str) -> Self {
        Self {
            id: RuleId::new(),
            owner: None,
            group: None,
            event_type: event_type.to_string(),
            severity_threshold: Severity::Warning,
            threshold_count: 1,
            threshold_window_minutes: 15,
            cooldown_minutes: 60,
            channels: vec![AlertChannel::InApp, AlertChannel::Email],
        }
    }
}

/// Append-only record of one rule evaluation that passed the gates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    /// Rule that was evaluated
    pub rule: RuleId,
    /// Owner the event concerned
    pub owner: Option<OwnerId>,
    /// Group the event concerned
    pub group: Option<GroupId>,
    /// Event type
    pub event_type: String,
    /// Effective severity
    pub severity: Severity,
    /// Event headline
    pub title: String,
    /// Event description
    pub message: String,
    /// Event metadata
    pub metadata: Value,
    /// Dedup key the evaluation ran under
    pub dedup_key: String,
    /// Channels that accepted the dispatch; empty below threshold
    pub channels_sent: Vec<AlertChannel>,
    /// Unix seconds of the evaluation
    pub created_at: i64,
}

/// An in-app notification record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient
    pub owner: OwnerId,
    /// Headline
    pub title: String,
    /// Body
    pub message: String,
    /// Severity for display
    pub severity: Severity,
    /// Unix seconds
    pub created_at: i64,
}
