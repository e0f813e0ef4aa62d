//! Fan-out behavior: thresholds, cooldowns, dedup keys, channel isolation

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use ocmt_alerts::{
    AlertChannel, AlertEngine, AlertEvent, AlertRule, AlertSinks, AlertStores, Broadcaster,
    ChannelConfigStore, InMemoryAlertStores, Mailer, RecipientDirectory, WebhookConfig,
    WebhookPoster,
};
use ocmt_core::clock::ManualClock;
use ocmt_core::{Clock, OwnerId, RuleId, Severity};
use ocmt_crypto::Keyring;

const KEY: &str = "0404040404040404040404040404040404040404040404040404040404040404";

#[derive(Default)]
struct RecordingBroadcaster {
    events: Mutex<Vec<(OwnerId, String)>>,
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast(&self, owner: OwnerId, event_name: &str, _payload: &Value) {
        self.events.lock().push((owner, event_name.to_string()));
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn enqueue(&self, to: &str, subject: &str, _body: &str) -> Result<(), String> {
        self.sent.lock().push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

struct StaticRecipients {
    address: Option<String>,
}

#[async_trait]
impl RecipientDirectory for StaticRecipients {
    async fn email_for(&self, _owner: OwnerId) -> Option<String> {
        self.address.clone()
    }
}

/// Poster that returns a fixed status per channel URL
struct ScriptedPoster {
    posts: Mutex<Vec<(String, Option<String>)>>,
    status_for: fn(&str) -> u16,
}

#[async_trait]
impl WebhookPoster for ScriptedPoster {
    async fn post_json(
        &self,
        url: &str,
        auth_header: Option<&str>,
        _payload: &Value,
    ) -> Result<u16, String> {
        self.posts
            .lock()
            .push((url.to_string(), auth_header.map(str::to_string)));
        Ok((self.status_for)(url))
    }
}

struct StaticConfigs {
    keyring: Arc<Keyring>,
    with_auth: bool,
}

#[async_trait]
impl ChannelConfigStore for StaticConfigs {
    async fn config_for(&self, _owner: OwnerId, channel: AlertChannel) -> Option<WebhookConfig> {
        match channel {
            AlertChannel::Slack | AlertChannel::Discord | AlertChannel::Webhook => {
                Some(WebhookConfig {
                    url: format!("https://hooks.example.com/{channel}"),
                    auth_ciphertext: self
                        .with_auth
                        .then(|| self.keyring.encrypt(b"Bearer hook-secret").unwrap()),
                })
            }
            _ => None,
        }
    }
}

struct Harness {
    engine: AlertEngine,
    stores: Arc<InMemoryAlertStores>,
    broadcaster: Arc<RecordingBroadcaster>,
    mailer: Arc<RecordingMailer>,
    poster: Arc<ScriptedPoster>,
    time: ManualClock,
}

fn harness(status_for: fn(&str) -> u16) -> Harness {
    let (clock, time) = Clock::manual(1_700_000_000_000);
    let keyring = Arc::new(Keyring::new(0, KEY).unwrap());
    let stores = Arc::new(InMemoryAlertStores::new());
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let mailer = Arc::new(RecordingMailer::default());
    let poster = Arc::new(ScriptedPoster {
        posts: Mutex::new(Vec::new()),
        status_for,
    });

    let engine = AlertEngine::new(
        AlertStores {
            rules: stores.clone(),
            cooldowns: stores.clone(),
            history: stores.clone(),
            notifications: stores.clone(),
        },
        AlertSinks {
            channel_configs: Arc::new(StaticConfigs {
                keyring: keyring.clone(),
                with_auth: true,
            }),
            recipients: Arc::new(StaticRecipients {
                address: Some("owner@example.com".into()),
            }),
            mailer: Some(mailer.clone()),
            broadcaster: broadcaster.clone(),
            poster: poster.clone(),
        },
        keyring,
        clock,
    );

    Harness {
        engine,
        stores,
        broadcaster,
        mailer,
        poster,
        time,
    }
}

fn event(owner: OwnerId, ip: &str) -> AlertEvent {
    AlertEvent {
        event_type: "auth.failed".into(),
        owner: Some(owner),
        group: None,
        title: "Failed login".into(),
        message: "Wrong password".into(),
        severity: Some(Severity::Critical),
        metadata: json!({ "ip": ip }),
    }
}

fn threshold_rule() -> AlertRule {
    AlertRule {
        id: RuleId::new(),
        owner: None,
        group: None,
        event_type: "auth.failed".into(),
        severity_threshold: Severity::Warning,
        threshold_count: 3,
        threshold_window_minutes: 15,
        cooldown_minutes: 60,
        channels: vec![AlertChannel::InApp, AlertChannel::Email],
    }
}

fn fanned_out(stores: &InMemoryAlertStores) -> usize {
    stores
        .history_rows()
        .iter()
        .filter(|row| !row.channels_sent.is_empty())
        .count()
}

#[tokio::test]
async fn threshold_then_cooldown_produces_exactly_one_fanout() {
    let h = harness(|_| 200);
    h.stores.add_rule(threshold_rule());
    let owner = OwnerId::new();

    // Three triggers with the same dedup key inside five minutes.
    for _ in 0..2 {
        h.engine.trigger(event(owner, "203.0.113.9")).await;
        h.time.advance_secs(120);
        assert_eq!(fanned_out(&h.stores), 0);
    }
    h.engine.trigger(event(owner, "203.0.113.9")).await;
    assert_eq!(fanned_out(&h.stores), 1);
    assert_eq!(h.mailer.sent.lock().len(), 1);
    assert_eq!(h.broadcaster.events.lock().len(), 1);

    // A fourth trigger inside the cooldown hour does nothing.
    h.time.advance_secs(30 * 60);
    h.engine.trigger(event(owner, "203.0.113.9")).await;
    assert_eq!(fanned_out(&h.stores), 1);

    // A different source IP is a different dedup key; it starts its own
    // threshold count instead of fanning out immediately.
    h.engine.trigger(event(owner, "198.51.100.7")).await;
    let other_key_rows: Vec<_> = h
        .stores
        .history_rows()
        .into_iter()
        .filter(|row| row.metadata["ip"] == "198.51.100.7")
        .collect();
    assert_eq!(other_key_rows.len(), 1);
    assert!(other_key_rows[0].channels_sent.is_empty());
}

#[tokio::test]
async fn immediate_threshold_dedups_within_cooldown() {
    let h = harness(|_| 200);
    let mut rule = threshold_rule();
    rule.threshold_count = 1;
    h.stores.add_rule(rule);
    let owner = OwnerId::new();

    h.engine.trigger(event(owner, "203.0.113.9")).await;
    h.engine.trigger(event(owner, "203.0.113.9")).await;
    assert_eq!(fanned_out(&h.stores), 1);

    // Cooldown expires after an hour; the next trigger fans out again.
    h.time.advance_secs(61 * 60);
    h.engine.trigger(event(owner, "203.0.113.9")).await;
    assert_eq!(fanned_out(&h.stores), 2);
}

#[tokio::test]
async fn default_rule_applies_when_no_rule_matches() {
    let h = harness(|_| 200);
    let owner = OwnerId::new();

    // Default severity threshold is warning: info events only log history.
    let mut quiet = event(owner, "203.0.113.9");
    quiet.severity = Some(Severity::Info);
    h.engine.trigger(quiet).await;
    assert_eq!(fanned_out(&h.stores), 0);
    assert!(h.stores.history_rows().is_empty());

    // Critical events fan out on the synthesized default channels.
    h.engine.trigger(event(owner, "203.0.113.9")).await;
    let rows = h.stores.history_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].channels_sent,
        vec![AlertChannel::InApp, AlertChannel::Email]
    );
    assert_eq!(h.stores.notification_rows().len(), 1);
}

#[tokio::test]
async fn one_failing_channel_does_not_block_the_others() {
    let h = harness(|url| if url.ends_with("slack") { 500 } else { 200 });
    let mut rule = threshold_rule();
    rule.threshold_count = 1;
    rule.channels = vec![AlertChannel::Slack, AlertChannel::Webhook, AlertChannel::InApp];
    h.stores.add_rule(rule);
    let owner = OwnerId::new();

    h.engine.trigger(event(owner, "203.0.113.9")).await;
    let rows = h.stores.history_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].channels_sent,
        vec![AlertChannel::Webhook, AlertChannel::InApp]
    );

    // Both webhook posts went out, with the decrypted auth header attached.
    let posts = h.poster.posts.lock();
    assert_eq!(posts.len(), 2);
    assert!(posts
        .iter()
        .all(|(_, auth)| auth.as_deref() == Some("Bearer hook-secret")));
}

#[tokio::test]
async fn idle_dedup_locks_are_reaped_but_recent_ones_survive() {
    let h = harness(|_| 200);
    let owner = OwnerId::new();

    h.engine.trigger(event(owner, "203.0.113.9")).await;
    h.engine.trigger(event(owner, "198.51.100.7")).await;

    // Both keys were used just now; nothing to reap.
    assert_eq!(h.engine.reap_idle_locks(), 0);

    // One key goes idle, the other stays warm.
    h.time.advance_secs(9 * 60);
    h.engine.trigger(event(owner, "203.0.113.9")).await;
    h.time.advance_secs(2 * 60);
    assert_eq!(h.engine.reap_idle_locks(), 1);

    // A reaped key just gets a fresh lock on its next trigger.
    h.engine.trigger(event(owner, "198.51.100.7")).await;
    assert_eq!(h.engine.reap_idle_locks(), 0);
}

#[tokio::test]
async fn missing_email_address_is_tolerated_silently() {
    let mut h = harness(|_| 200);
    // Rebuild with no recipient address.
    let (clock, _) = Clock::manual(1_700_000_000_000);
    let keyring = Arc::new(Keyring::new(0, KEY).unwrap());
    let stores = Arc::new(InMemoryAlertStores::new());
    h.stores = stores.clone();
    h.engine = AlertEngine::new(
        AlertStores {
            rules: stores.clone(),
            cooldowns: stores.clone(),
            history: stores.clone(),
            notifications: stores.clone(),
        },
        AlertSinks {
            channel_configs: Arc::new(StaticConfigs {
                keyring: keyring.clone(),
                with_auth: false,
            }),
            recipients: Arc::new(StaticRecipients { address: None }),
            mailer: Some(h.mailer.clone()),
            broadcaster: h.broadcaster.clone(),
            poster: h.poster.clone(),
        },
        keyring,
        clock,
    );

    let mut rule = threshold_rule();
    rule.threshold_count = 1;
    stores.add_rule(rule);

    h.engine.trigger(event(OwnerId::new(), "203.0.113.9")).await;
    let rows = stores.history_rows();
    assert_eq!(rows.len(), 1);
    // In-app went through; email was skipped, not failed.
    assert_eq!(rows[0].channels_sent, vec![AlertChannel::InApp]);
    assert!(h.mailer.sent.lock().is_empty());
}
