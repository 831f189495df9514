//! Redundant log suppression.
//!
//! Under sustained broker unavailability every produced record fails with
//! the same message. The filter lets the first occurrence of a message
//! through and suppresses repeats until the window expires.
//!
//! Shared by completion callbacks of all partitions, so the map is a
//! `DashMap`.

use crate::config::LogFilterConfig;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Above this many tracked messages, expired entries are pruned on insert.
const PRUNE_THRESHOLD: usize = 10_000;

static GLOBAL: OnceLock<Arc<RedundantLogFilter>> = OnceLock::new();

/// Suppresses repeated log messages within a time window.
#[derive(Debug)]
pub struct RedundantLogFilter {
    window: Duration,
    first_seen: DashMap<u64, Instant>,
}

impl RedundantLogFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            first_seen: DashMap::new(),
        }
    }

    pub fn from_config(config: &LogFilterConfig) -> Self {
        Self::new(config.window_duration())
    }

    /// Process-wide filter with the default window.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::from_config(&LogFilterConfig::default()))))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// `false` the first time `message` is seen within the window, `true`
    /// for every repeat until the window expires.
    pub fn is_redundant(&self, message: &str) -> bool {
        self.is_redundant_at(message, Instant::now())
    }

    /// [`is_redundant`](Self::is_redundant) with an explicit clock.
    pub fn is_redundant_at(&self, message: &str, now: Instant) -> bool {
        let key = fingerprint(message);
        if let Some(seen) = self.first_seen.get(&key) {
            if now.saturating_duration_since(*seen) < self.window {
                return true;
            }
        }
        // Racing callers may both insert; only one of them reports first.
        let previous = self.first_seen.insert(key, now);
        if self.first_seen.len() > PRUNE_THRESHOLD {
            self.prune_at(now);
        }
        matches!(previous, Some(seen) if now.saturating_duration_since(seen) < self.window)
    }

    /// Drop entries whose window has expired.
    pub fn prune_at(&self, now: Instant) {
        self.first_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < self.window);
    }

    /// Forget every message.
    pub fn clear(&self) {
        self.first_seen.clear();
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}

fn fingerprint(message: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    message.hash(&mut hasher);
    hasher.finish()
}
