//! The alert engine
//!
//! For one dedup key the whole evaluation, from severity gate through
//! cooldown, threshold count, dispatch, and history write, runs under
//! a keyed async mutex, so two concurrent triggers for the same situation
//! cannot both fan out. Different keys do not serialize against each
//! other. `trigger` is best-effort and never returns an error.

use async_lock::Mutex;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use ocmt_core::{Clock, Result, Severity};
use ocmt_crypto::Keyring;

use crate::channel::{
    AlertChannel, Broadcaster, ChannelConfigStore, Mailer, RecipientDirectory, WebhookPoster,
};
use crate::dedup::dedup_key;
use crate::store::{AlertHistoryStore, AlertRuleStore, CooldownStore, NotificationStore};
use crate::throttle::ChannelThrottle;
use crate::types::{AlertEvent, AlertRule, HistoryRow, Notification};

/// The persistence side of the engine
pub struct AlertStores {
    /// Rule lookup
    pub rules: Arc<dyn AlertRuleStore>,
    /// Cooldown rows
    pub cooldowns: Arc<dyn CooldownStore>,
    /// Append-only history
    pub history: Arc<dyn AlertHistoryStore>,
    /// In-app notification records
    pub notifications: Arc<dyn NotificationStore>,
}

/// The delivery side of the engine
pub struct AlertSinks {
    /// Per-owner channel configuration
    pub channel_configs: Arc<dyn ChannelConfigStore>,
    /// Email address lookup
    pub recipients: Arc<dyn RecipientDirectory>,
    /// External mailer; alerts tolerate its absence
    pub mailer: Option<Arc<dyn Mailer>>,
    /// SSE fan-out for in-app notifications
    pub broadcaster: Arc<dyn Broadcaster>,
    /// Webhook HTTP client
    pub poster: Arc<dyn WebhookPoster>,
}

enum DispatchOutcome {
    Sent,
    Skipped(&'static str),
    Failed(String),
}

/// How long an unused dedup-key lock survives before the reaper may drop it
const LOCK_IDLE_MS: i64 = 10 * 60 * 1000;

struct KeyedLock {
    lock: Arc<Mutex<()>>,
    last_used: i64,
}

/// Rule-gated, deduplicated alert fan-out
pub struct AlertEngine {
    stores: AlertStores,
    sinks: AlertSinks,
    keyring: Arc<Keyring>,
    throttle: ChannelThrottle,
    locks: DashMap<String, KeyedLock>,
    severity_defaults: HashMap<String, Severity>,
    clock: Clock,
}

impl AlertEngine {
    /// Assemble an engine
    pub fn new(stores: AlertStores, sinks: AlertSinks, keyring: Arc<Keyring>, clock: Clock) -> Self {
        Self {
            stores,
            sinks,
            keyring,
            throttle: ChannelThrottle::new(clock.clone()),
            locks: DashMap::new(),
            severity_defaults: HashMap::new(),
            clock,
        }
    }

    /// Register a default severity for an event type, used when a trigger
    /// carries none.
    pub fn with_severity_default(mut self, event_type: &str, severity: Severity) -> Self {
        self.severity_defaults.insert(event_type.to_string(), severity);
        self
    }

    /// The per-channel throttle, exposed so the runtime reaper can sweep it
    pub fn throttle(&self) -> &ChannelThrottle {
        &self.throttle
    }

    /// Drop dedup-key locks idle past [`LOCK_IDLE_MS`]; returns how many.
    /// A lock still held by an in-flight trigger is never dropped: the map
    /// holds one reference, so a strong count above one means a borrower.
    pub fn reap_idle_locks(&self) -> usize {
        let cutoff = self.clock.now_ms() - LOCK_IDLE_MS;
        let before = self.locks.len();
        self.locks
            .retain(|_, entry| Arc::strong_count(&entry.lock) > 1 || entry.last_used >= cutoff);
        before - self.locks.len()
    }

    /// Evaluate an event against every applicable rule. Best-effort: store
    /// and channel failures are logged, never propagated.
    pub async fn trigger(&self, event: AlertEvent) {
        let severity = event
            .severity
            .or_else(|| self.severity_defaults.get(&event.event_type).copied())
            .unwrap_or(Severity::Info);
        let key = dedup_key(&event.event_type, event.owner, event.group, event.ip());

        let lock = {
            let mut entry = self.locks.entry(key.clone()).or_insert_with(|| KeyedLock {
                lock: Arc::new(Mutex::new(())),
                last_used: 0,
            });
            entry.last_used = self.clock.now_ms();
            entry.lock.clone()
        };
        let _guard = lock.lock().await;

        let rules = match self
            .stores
            .rules
            .rules_for(&event.event_type, event.owner, event.group)
            .await
        {
            Ok(rules) => rules,
            Err(err) => {
                tracing::warn!(error = %err, event_type = %event.event_type, "alert rule lookup failed");
                return;
            }
        };
        let rules = if rules.is_empty() {
            vec![AlertRule::default_for(&event.event_type)]
        } else {
            rules
        };

        for rule in &rules {
            if let Err(err) = self.apply_rule(rule, &event, severity, &key).await {
                tracing::warn!(error = %err, rule = %rule.id, "alert rule evaluation failed");
            }
        }
    }

    async fn apply_rule(
        &self,
        rule: &AlertRule,
        event: &AlertEvent,
        severity: Severity,
        key: &str,
    ) -> Result<()> {
        if severity < rule.severity_threshold {
            tracing::debug!(rule = %rule.id, %severity, "below severity threshold");
            return Ok(());
        }

        let now = self.clock.now_secs();
        if self.stores.cooldowns.is_active(key, now).await? {
            tracing::debug!(rule = %rule.id, dedup_key = key, "in cooldown");
            return Ok(());
        }

        let since = now - rule.threshold_window_minutes * 60;
        let prior = self.stores.history.count_since(key, since).await?;
        if prior + 1 < rule.threshold_count {
            self.stores
                .history
                .append(self.history_row(rule, event, severity, key, Vec::new()))
                .await?;
            return Ok(());
        }

        let mut sent = Vec::new();
        for channel in &rule.channels {
            if !self.throttle.allow(*channel, event.owner) {
                tracing::warn!(%channel, "channel dispatch rate limit hit");
                continue;
            }
            match self.dispatch(*channel, event, severity).await {
                DispatchOutcome::Sent => sent.push(*channel),
                DispatchOutcome::Skipped(reason) => {
                    tracing::debug!(%channel, reason, "channel skipped");
                }
                DispatchOutcome::Failed(reason) => {
                    tracing::warn!(%channel, reason = %reason, "channel dispatch failed");
                }
            }
        }

        self.stores
            .history
            .append(self.history_row(rule, event, severity, key, sent))
            .await?;
        self.stores
            .cooldowns
            .set(key, now + rule.cooldown_minutes * 60)
            .await?;
        Ok(())
    }

    async fn dispatch(
        &self,
        channel: AlertChannel,
        event: &AlertEvent,
        severity: Severity,
    ) -> DispatchOutcome {
        match channel {
            AlertChannel::InApp => self.dispatch_in_app(event, severity).await,
            AlertChannel::Email => self.dispatch_email(event).await,
            AlertChannel::Slack | AlertChannel::Discord | AlertChannel::Webhook => {
                self.dispatch_webhook(channel, event, severity).await
            }
        }
    }

    async fn dispatch_in_app(&self, event: &AlertEvent, severity: Severity) -> DispatchOutcome {
        let Some(owner) = event.owner else {
            return DispatchOutcome::Skipped("no owner to notify");
        };
        let notification = Notification {
            owner,
            title: event.title.clone(),
            message: event.message.clone(),
            severity,
            created_at: self.clock.now_secs(),
        };
        if let Err(err) = self.stores.notifications.append(notification).await {
            return DispatchOutcome::Failed(err.to_string());
        }
        let payload = AlertChannel::InApp.shape_payload(event, severity);
        self.sinks
            .broadcaster
            .broadcast(owner, "notification", &payload)
            .await;
        DispatchOutcome::Sent
    }

    async fn dispatch_email(&self, event: &AlertEvent) -> DispatchOutcome {
        let Some(mailer) = self.sinks.mailer.as_ref() else {
            return DispatchOutcome::Skipped("no mailer configured");
        };
        let Some(owner) = event.owner else {
            return DispatchOutcome::Skipped("no owner to email");
        };
        let Some(address) = self.sinks.recipients.email_for(owner).await else {
            // Owners without an address are normal, not an error.
            return DispatchOutcome::Skipped("owner has no email address");
        };
        match mailer.enqueue(&address, &event.title, &event.message).await {
            Ok(()) => DispatchOutcome::Sent,
            Err(reason) => DispatchOutcome::Failed(reason),
        }
    }

    async fn dispatch_webhook(
        &self,
        channel: AlertChannel,
        event: &AlertEvent,
        severity: Severity,
    ) -> DispatchOutcome {
        let Some(owner) = event.owner else {
            return DispatchOutcome::Skipped("no owner configuration to look up");
        };
        let Some(config) = self.sinks.channel_configs.config_for(owner, channel).await else {
            return DispatchOutcome::Skipped("channel not configured");
        };

        // Auth material stays encrypted until the moment of dispatch.
        let auth_header = match config.auth_ciphertext.as_deref() {
            Some(ciphertext) => match self.keyring.decrypt(ciphertext) {
                Ok(raw) => match String::from_utf8(raw) {
                    Ok(value) => Some(value),
                    Err(_) => return DispatchOutcome::Failed("auth config is not UTF-8".into()),
                },
                Err(err) => return DispatchOutcome::Failed(format!("auth decrypt failed: {err}")),
            },
            None => None,
        };

        let payload = channel.shape_payload(event, severity);
        match self
            .sinks
            .poster
            .post_json(&config.url, auth_header.as_deref(), &payload)
            .await
        {
            Ok(status) if (200..300).contains(&status) => DispatchOutcome::Sent,
            Ok(status) => DispatchOutcome::Failed(format!("endpoint returned {status}")),
            Err(reason) => DispatchOutcome::Failed(reason),
        }
    }

    fn history_row(
        &self,
        rule: &AlertRule,
        event: &AlertEvent,
        severity: Severity,
        key: &str,
        channels_sent: Vec<AlertChannel>,
    ) -> HistoryRow {
        HistoryRow {
            rule: rule.id,
            owner: event.owner,
            group: event.group,
            event_type: event.event_type.clone(),
            severity,
            title: event.title.clone(),
            message: event.message.clone(),
            metadata: event.metadata.clone(),
            dedup_key: key.to_string(),
            channels_sent,
            created_at: self.clock.now_secs(),
        }
    }
}
