//! # OCMT Alerts
//!
//! Best-effort alert fan-out. A trigger resolves its effective severity,
//! derives a dedup key, and walks every applicable rule through the same
//! gauntlet: severity gate, cooldown gate, threshold window, per-channel
//! throttle, dispatch, history append, cooldown update. The sequence is
//! atomic per dedup key; one channel's failure never blocks another; and
//! `trigger` never returns an error to its caller.

#![forbid(unsafe_code)]

pub mod channel;
pub mod dedup;
pub mod engine;
pub mod store;
pub mod throttle;
pub mod types;

pub use channel::{
    AlertChannel, Broadcaster, ChannelConfigStore, HttpWebhookPoster, Mailer, RecipientDirectory,
    WebhookConfig, WebhookPoster,
};
pub use dedup::dedup_key;
pub use engine::{AlertEngine, AlertSinks, AlertStores};
pub use store::{
    AlertHistoryStore, AlertRuleStore, CooldownStore, InMemoryAlertStores, NotificationStore,
};
pub use throttle::ChannelThrottle;
pub use types::{AlertEvent, AlertRule, HistoryRow, Notification};
