//! Alert channels and per-variant payload shaping
//!
//! The channel set is closed. Each webhook-flavored variant shapes its own
//! payload (Slack blocks, Discord embed, or a generic JSON body) and the
//! severity color survives the translation: critical is red, warning is
//! amber, info is indigo.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use ocmt_core::{OwnerId, Severity};

use crate::types::AlertEvent;

/// Dispatch timeout for webhook-flavored channels
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// The closed set of alert channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    /// Notification record plus SSE broadcast to the owner
    InApp,
    /// Queued to the external mailer
    Email,
    /// Slack incoming webhook
    Slack,
    /// Discord webhook
    Discord,
    /// Generic JSON webhook
    Webhook,
}

impl AlertChannel {
    /// Wire name of this channel
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::InApp => "in_app",
            AlertChannel::Email => "email",
            AlertChannel::Slack => "slack",
            AlertChannel::Discord => "discord",
            AlertChannel::Webhook => "webhook",
        }
    }

    /// Shape the dispatch payload for this channel.
    pub fn shape_payload(&self, event: &AlertEvent, severity: Severity) -> Value {
        match self {
            AlertChannel::Slack => json!({
                "attachments": [{
                    "color": severity.color(),
                    "blocks": [
                        {
                            "type": "header",
                            "text": { "type": "plain_text", "text": event.title },
                        },
                        {
                            "type": "section",
                            "text": { "type": "mrkdwn", "text": event.message },
                        },
                    ],
                }],
            }),
            AlertChannel::Discord => json!({
                "embeds": [{
                    "title": event.title,
                    "description": event.message,
                    "color": color_as_int(severity),
                }],
            }),
            // In-app, email, and generic webhooks all carry the event as-is.
            AlertChannel::InApp | AlertChannel::Email | AlertChannel::Webhook => json!({
                "event_type": event.event_type,
                "severity": severity,
                "title": event.title,
                "message": event.message,
                "metadata": event.metadata,
            }),
        }
    }
}

impl std::fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn color_as_int(severity: Severity) -> u32 {
    u32::from_str_radix(severity.color().trim_start_matches('#'), 16).unwrap_or(0)
}

/// An owner's configuration for one webhook-flavored channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Destination URL
    pub url: String,
    /// Versioned ciphertext of an `Authorization` header value; decrypted
    /// only at dispatch
    pub auth_ciphertext: Option<String>,
}

/// Looks up an owner's channel configuration
#[async_trait]
pub trait ChannelConfigStore: Send + Sync {
    /// Configuration for `(owner, channel)`, or `None` when unconfigured
    async fn config_for(&self, owner: OwnerId, channel: AlertChannel) -> Option<WebhookConfig>;
}

/// Resolves an owner's notification email address
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// The owner's address, when one is configured
    async fn email_for(&self, owner: OwnerId) -> Option<String>;
}

/// Hands messages to the external mailer
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Enqueue a message; delivery is the mailer's problem
    async fn enqueue(&self, to: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// Pushes an SSE event to an owner's live subscribers
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Fan a named event out to the owner's subscribers
    async fn broadcast(&self, owner: OwnerId, event_name: &str, payload: &Value);
}

/// Posts JSON to a webhook URL
#[async_trait]
pub trait WebhookPoster: Send + Sync {
    /// POST `payload`, returning the response status code
    async fn post_json(
        &self,
        url: &str,
        auth_header: Option<&str>,
        payload: &Value,
    ) -> Result<u16, String>;
}

/// Production poster backed by reqwest
pub struct HttpWebhookPoster {
    client: reqwest::Client,
}

impl HttpWebhookPoster {
    /// Poster with the standard 10 s dispatch timeout
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookPoster for HttpWebhookPoster {
    async fn post_json(
        &self,
        url: &str,
        auth_header: Option<&str>,
        payload: &Value,
    ) -> Result<u16, String> {
        let mut request = self.client.post(url).json(payload);
        if let Some(value) = auth_header {
            request = request.header(reqwest::header::AUTHORIZATION, value);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> AlertEvent {
        AlertEvent {
            event_type: "auth.failed".into(),
            owner: None,
            group: None,
            title: "Failed login".into(),
            message: "Three failed attempts".into(),
            severity: None,
            metadata: json!({"ip": "203.0.113.9"}),
        }
    }

    #[test]
    fn slack_payload_carries_blocks_and_color() {
        let payload = AlertChannel::Slack.shape_payload(&event(), Severity::Critical);
        assert_eq!(payload["attachments"][0]["color"], "#dc2626");
        assert_eq!(
            payload["attachments"][0]["blocks"][0]["text"]["text"],
            "Failed login"
        );
    }

    #[test]
    fn discord_payload_uses_an_integer_color() {
        let payload = AlertChannel::Discord.shape_payload(&event(), Severity::Warning);
        assert_eq!(payload["embeds"][0]["color"], 0x00f5_9e0b);
        assert_eq!(payload["embeds"][0]["title"], "Failed login");
    }

    #[test]
    fn generic_payload_keeps_the_event_fields() {
        let payload = AlertChannel::Webhook.shape_payload(&event(), Severity::Info);
        assert_eq!(payload["event_type"], "auth.failed");
        assert_eq!(payload["severity"], "info");
        assert_eq!(payload["metadata"]["ip"], "203.0.113.9");
    }
}
