//! In-process per-channel throttle
//!
//! Separate from the cooldown table: this is a hard ceiling on dispatches
//! per `(channel, owner)` per minute, held in memory and reaped
//! periodically. It protects the channel endpoints, not the humans.

use dashmap::DashMap;

use ocmt_core::{Clock, OwnerId};

use crate::channel::AlertChannel;

/// Default dispatches allowed per `(channel, owner)` per minute
pub const DEFAULT_PER_MINUTE: u32 = 10;

const WINDOW_MS: i64 = 60_000;

struct Window {
    count: u32,
    window_start: i64,
}

/// Fixed-window dispatch counter keyed by `(channel, owner)`
pub struct ChannelThrottle {
    windows: DashMap<(AlertChannel, Option<OwnerId>), Window>,
    clock: Clock,
    max_per_minute: u32,
}

impl ChannelThrottle {
    /// Throttle with the default ceiling
    pub fn new(clock: Clock) -> Self {
        Self::with_limit(clock, DEFAULT_PER_MINUTE)
    }

    /// Throttle with an explicit per-minute ceiling
    pub fn with_limit(clock: Clock, max_per_minute: u32) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            max_per_minute,
        }
    }

    /// Whether one more dispatch is allowed right now (and count it).
    pub fn allow(&self, channel: AlertChannel, owner: Option<OwnerId>) -> bool {
        let now = self.clock.now_ms();
        let mut entry = self.windows.entry((channel, owner)).or_insert(Window {
            count: 0,
            window_start: now,
        });
        if now - entry.window_start > WINDOW_MS {
            entry.count = 0;
            entry.window_start = now;
        }
        if entry.count >= self.max_per_minute {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drop windows idle for two window widths; returns how many.
    pub fn reap_idle(&self) -> usize {
        let cutoff = self.clock.now_ms() - 2 * WINDOW_MS;
        let before = self.windows.len();
        self.windows.retain(|_, window| window.window_start >= cutoff);
        before - self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleventh_dispatch_in_a_minute_is_refused() {
        let (clock, _) = Clock::manual(0);
        let throttle = ChannelThrottle::new(clock);
        let owner = Some(OwnerId::new());
        for _ in 0..DEFAULT_PER_MINUTE {
            assert!(throttle.allow(AlertChannel::Email, owner));
        }
        assert!(!throttle.allow(AlertChannel::Email, owner));
        // Another channel for the same owner is unaffected.
        assert!(throttle.allow(AlertChannel::Slack, owner));
    }

    #[test]
    fn window_resets_after_a_minute() {
        let (clock, time) = Clock::manual(0);
        let throttle = ChannelThrottle::with_limit(clock, 1);
        let owner = Some(OwnerId::new());
        assert!(throttle.allow(AlertChannel::Webhook, owner));
        assert!(!throttle.allow(AlertChannel::Webhook, owner));
        time.advance_ms(WINDOW_MS + 1);
        assert!(throttle.allow(AlertChannel::Webhook, owner));
    }

    #[test]
    fn idle_windows_are_reaped() {
        let (clock, time) = Clock::manual(0);
        let throttle = ChannelThrottle::new(clock);
        throttle.allow(AlertChannel::Email, Some(OwnerId::new()));
        assert_eq!(throttle.reap_idle(), 0);
        time.advance_ms(2 * WINDOW_MS + 1);
        assert_eq!(throttle.reap_idle(), 1);
    }
}
