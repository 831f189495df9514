//! Offline-instance tracking for push monitoring.
//!
//! A push stays healthy while few of the instances ingesting a store
//! version are offline. Once too many are offline the version enters a
//! pending state; if that persists beyond the configured wait, the push is
//! reported as errored and the entry is dropped.
//!
//! ```text
//!           offline > allowed              persists > wait
//! Healthy ───────────────────► Pending ───────────────────► Error (entry removed)
//!    ▲                            │
//!    └──── offline <= allowed ────┘
//! ```
//!
//! `allowed = max(max_count, floor(max_ratio * total))`.
//!
//! The tracker is process-wide state keyed by version topic, read and
//! cleared concurrently by monitoring tasks.

use crate::config::PushMonitorConfig;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static GLOBAL: OnceLock<Arc<OfflineInstanceTracker>> = OnceLock::new();

/// Thresholds deciding when too many instances are offline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfflineLimits {
    pub max_offline_instance_count: usize,
    pub max_offline_instance_ratio: f64,
}

impl OfflineLimits {
    pub fn from_config(config: &PushMonitorConfig) -> Self {
        Self {
            max_offline_instance_count: config.max_offline_instance_count,
            max_offline_instance_ratio: config.max_offline_instance_ratio,
        }
    }

    /// Offline instances tolerated out of `total`.
    pub fn max_allowed(&self, total: usize) -> usize {
        let by_ratio = (self.max_offline_instance_ratio * total as f64).floor();
        let by_ratio = if by_ratio.is_finite() && by_ratio > 0.0 {
            by_ratio as usize
        } else {
            0
        };
        self.max_offline_instance_count.max(by_ratio)
    }
}

/// Outcome of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineStatus {
    /// Offline count within limits.
    Healthy,
    /// Too many offline, waiting to see if they recover.
    Pending { since: Instant },
    /// Too many offline for longer than the wait window.
    Error { offline: usize, total: usize, message: String },
}

/// Tracks how long each store version has had too many offline instances.
#[derive(Debug)]
pub struct OfflineInstanceTracker {
    error_wait: Duration,
    first_seen: DashMap<String, Instant>,
}

impl OfflineInstanceTracker {
    pub fn new(error_wait: Duration) -> Self {
        Self {
            error_wait,
            first_seen: DashMap::new(),
        }
    }

    pub fn from_config(config: &PushMonitorConfig) -> Self {
        Self::new(config.offline_error_wait_duration())
    }

    /// Process-wide tracker with the default wait.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::from_config(&PushMonitorConfig::default()))))
    }

    pub fn observe(
        &self,
        topic: &str,
        offline: usize,
        total: usize,
        limits: OfflineLimits,
        example_offline: &[String],
    ) -> OfflineStatus {
        self.observe_at(topic, offline, total, limits, example_offline, Instant::now())
    }

    /// Record an observation of `offline` out of `total` instances at `now`.
    pub fn observe_at(
        &self,
        topic: &str,
        offline: usize,
        total: usize,
        limits: OfflineLimits,
        example_offline: &[String],
        now: Instant,
    ) -> OfflineStatus {
        if offline <= limits.max_allowed(total) {
            if self.first_seen.remove(topic).is_some() {
                debug!(topic, offline, total, "Offline instances recovered");
            }
            return OfflineStatus::Healthy;
        }

        match self.first_seen.entry(topic.to_string()) {
            Entry::Occupied(entry) => {
                let since = *entry.get();
                if now.saturating_duration_since(since) > self.error_wait {
                    entry.remove();
                    let message = format!(
                        "Too many dead instances: {}, total instances: {}, example offline instances: {:?}",
                        offline, total, example_offline
                    );
                    warn!(topic, offline, total, "Offline instances exceeded wait window");
                    OfflineStatus::Error {
                        offline,
                        total,
                        message,
                    }
                } else {
                    OfflineStatus::Pending { since }
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                debug!(topic, offline, total, "Too many offline instances, starting wait");
                OfflineStatus::Pending { since: now }
            }
        }
    }

    /// Forget a version (push completed or errored).
    pub fn clear(&self, topic: &str) {
        self.first_seen.remove(topic);
    }

    pub fn is_tracking(&self, topic: &str) -> bool {
        self.first_seen.contains_key(topic)
    }
}
