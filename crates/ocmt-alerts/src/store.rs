//! Alert persistence interfaces
//!
//! Rules, cooldowns, history, and notifications live in the relational
//! store; these traits are the boundary. The in-memory implementation
//! backs tests and single-node deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use ocmt_core::{GroupId, OwnerId, Result};

use crate::types::{AlertRule, HistoryRow, Notification};

/// Rule lookup by event type and scope
#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    /// Rules applicable to `(event_type, owner, group)`. A rule with no
    /// owner/group restriction matches everything of its event type.
    async fn rules_for(
        &self,
        event_type: &str,
        owner: Option<OwnerId>,
        group: Option<GroupId>,
    ) -> Result<Vec<AlertRule>>;
}

/// Cooldown rows keyed by dedup key
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Whether an unexpired cooldown exists for `dedup_key`
    async fn is_active(&self, dedup_key: &str, now: i64) -> Result<bool>;

    /// Insert or extend the cooldown for `dedup_key`
    async fn set(&self, dedup_key: &str, expires_at: i64) -> Result<()>;

    /// Remove expired rows; returns how many
    async fn purge_expired(&self, now: i64) -> Result<usize>;
}

/// Append-only alert history
#[async_trait]
pub trait AlertHistoryStore: Send + Sync {
    /// Append one evaluation record
    async fn append(&self, row: HistoryRow) -> Result<()>;

    /// Evaluations recorded for `dedup_key` at or after `since`
    async fn count_since(&self, dedup_key: &str, since: i64) -> Result<u32>;
}

/// In-app notification records
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Append one notification
    async fn append(&self, notification: Notification) -> Result<()>;
}

/// One struct implementing all four stores in memory
#[derive(Default)]
pub struct InMemoryAlertStores {
    rules: RwLock<Vec<AlertRule>>,
    cooldowns: DashMap<String, i64>,
    history: RwLock<Vec<HistoryRow>>,
    notifications: RwLock<Vec<Notification>>,
}

impl InMemoryAlertStores {
    /// Empty stores
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a rule
    pub fn add_rule(&self, rule: AlertRule) {
        self.rules.write().push(rule);
    }

    /// Snapshot of all history rows, oldest first
    pub fn history_rows(&self) -> Vec<HistoryRow> {
        self.history.read().clone()
    }

    /// Snapshot of all notifications, oldest first
    pub fn notification_rows(&self) -> Vec<Notification> {
        self.notifications.read().clone()
    }
}

#[async_trait]
impl AlertRuleStore for InMemoryAlertStores {
    async fn rules_for(
        &self,
        event_type: &str,
        owner: Option<OwnerId>,
        group: Option<GroupId>,
    ) -> Result<Vec<AlertRule>> {
        Ok(self
            .rules
            .read()
            .iter()
            .filter(|rule| {
                rule.event_type == event_type
                    && rule.owner.map_or(true, |o| Some(o) == owner)
                    && rule.group.map_or(true, |g| Some(g) == group)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CooldownStore for InMemoryAlertStores {
    async fn is_active(&self, dedup_key: &str, now: i64) -> Result<bool> {
        Ok(self
            .cooldowns
            .get(dedup_key)
            .map_or(false, |expires| *expires > now))
    }

    async fn set(&self, dedup_key: &str, expires_at: i64) -> Result<()> {
        self.cooldowns.insert(dedup_key.to_string(), expires_at);
        Ok(())
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        let before = self.cooldowns.len();
        self.cooldowns.retain(|_, expires| *expires > now);
        Ok(before - self.cooldowns.len())
    }
}

#[async_trait]
impl AlertHistoryStore for InMemoryAlertStores {
    async fn append(&self, row: HistoryRow) -> Result<()> {
        self.history.write().push(row);
        Ok(())
    }

    async fn count_since(&self, dedup_key: &str, since: i64) -> Result<u32> {
        Ok(self
            .history
            .read()
            .iter()
            .filter(|row| row.dedup_key == dedup_key && row.created_at >= since)
            .count() as u32)
    }
}

#[async_trait]
impl NotificationStore for InMemoryAlertStores {
    async fn append(&self, notification: Notification) -> Result<()> {
        self.notifications.write().push(notification);
        Ok(())
    }
}
