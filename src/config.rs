//! Configuration for the leader write path.
//!
//! Configuration can be constructed programmatically or deserialized from
//! JSON. Every field has a default, so a partial document is enough.
//!
//! # Quick Start
//!
//! ```rust
//! use replica_write_path::config::{WritePathConfig, StoreConfig};
//!
//! let config = WritePathConfig {
//!     store: StoreConfig::for_testing("user_profiles", 3),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! WritePathConfig
//! ├── store: StoreConfig             # store name, version, region
//! ├── chunking: ChunkingConfig       # large value splitting
//! ├── persistence: PersistenceConfig # drainer queues (backpressure)
//! ├── log_filter: LogFilterConfig    # redundant log suppression
//! └── push_monitor: PushMonitorConfig # offline instance tolerance
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "store": { "store_name": "user_profiles", "version": 3, "hybrid": true },
//!   "chunking": { "enabled": true, "max_chunk_size_bytes": 972800 },
//!   "persistence": { "drainer_count": 4, "queue_capacity": 1024 },
//!   "log_filter": { "window": "1h" }
//! }
//! ```

use crate::error::{Result, WritePathError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object for one store version's write path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WritePathConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub log_filter: LogFilterConfig,
    #[serde(default)]
    pub push_monitor: PushMonitorConfig,
}

impl WritePathConfig {
    /// Small thresholds for tests.
    pub fn for_testing(store_name: &str, version: u32) -> Self {
        Self {
            store: StoreConfig::for_testing(store_name, version),
            chunking: ChunkingConfig::for_testing(),
            persistence: PersistenceConfig::for_testing(),
            log_filter: LogFilterConfig::default(),
            push_monitor: PushMonitorConfig::default(),
        }
    }

    /// Reject configurations the write path cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.store.store_name.is_empty() {
            return Err(WritePathError::Config("store_name must not be empty".to_string()));
        }
        if self.chunking.enabled && self.chunking.max_chunk_size_bytes == 0 {
            return Err(WritePathError::Config(
                "max_chunk_size_bytes must be > 0 when chunking is enabled".to_string(),
            ));
        }
        if self.persistence.drainer_count == 0 {
            return Err(WritePathError::Config("drainer_count must be > 0".to_string()));
        }
        if self.persistence.queue_capacity == 0 {
            return Err(WritePathError::Config("queue_capacity must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.push_monitor.max_offline_instance_ratio) {
            return Err(WritePathError::Config(
                "max_offline_instance_ratio must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig: which store version this leader writes
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity of the store version being ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub store_name: String,

    pub version: u32,

    /// System stores skip latency accounting.
    #[serde(default)]
    pub user_system_store: bool,

    /// Hybrid stores also consume a real-time stream after the bulk load.
    #[serde(default)]
    pub hybrid: bool,

    /// Region id of this leader, used as the offset vector index for local writes.
    #[serde(default)]
    pub local_region_id: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_name: "default_store".to_string(),
            version: 1,
            user_system_store: false,
            hybrid: false,
            local_region_id: 0,
        }
    }
}

impl StoreConfig {
    /// Hybrid store config for tests.
    pub fn for_testing(store_name: &str, version: u32) -> Self {
        Self {
            store_name: store_name.to_string(),
            version,
            user_system_store: false,
            hybrid: true,
            local_region_id: 0,
        }
    }

    /// Name of the output log topic for this version (`<store>_v<version>`).
    pub fn version_topic(&self) -> String {
        format!("{}_v{}", self.store_name, self.version)
    }

    /// Name used to identify the ingestion task in logs.
    pub fn ingestion_task_name(&self) -> String {
        format!("{} ingestion task", self.version_topic())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ChunkingConfig: large value splitting
// ═══════════════════════════════════════════════════════════════════════════════

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Records whose key + value exceed this are split into chunks of at most
    /// this many payload bytes.
    #[serde(default = "default_max_chunk_size_bytes")]
    pub max_chunk_size_bytes: usize,

    /// Also chunk oversized replication metadata of chunked values.
    #[serde(default = "default_true")]
    pub rmd_chunking_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_chunk_size_bytes() -> usize {
    950 * 1024
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chunk_size_bytes: default_max_chunk_size_bytes(),
            rmd_chunking_enabled: true,
        }
    }
}

impl ChunkingConfig {
    /// Tiny chunk size so tests can chunk short values.
    pub fn for_testing() -> Self {
        Self {
            enabled: true,
            max_chunk_size_bytes: 16,
            rmd_chunking_enabled: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PersistenceConfig: drainer queues
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistence queue configuration.
///
/// Each drainer owns one bounded queue; a full queue blocks the producer
/// callback that is handing records over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_drainer_count")]
    pub drainer_count: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_drainer_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            drainer_count: default_drainer_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl PersistenceConfig {
    pub fn for_testing() -> Self {
        Self {
            drainer_count: 2,
            queue_capacity: 64,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LogFilterConfig: redundant log suppression
// ═══════════════════════════════════════════════════════════════════════════════

/// Redundant log filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilterConfig {
    /// How long an identical message stays suppressed, e.g. `"1h"`.
    #[serde(default = "default_log_filter_window")]
    pub window: String,
}

fn default_log_filter_window() -> String {
    "1h".to_string()
}

impl Default for LogFilterConfig {
    fn default() -> Self {
        Self {
            window: default_log_filter_window(),
        }
    }
}

impl LogFilterConfig {
    /// Parse the window string to a Duration, falling back to one hour.
    pub fn window_duration(&self) -> Duration {
        humantime::parse_duration(&self.window).unwrap_or(Duration::from_secs(3600))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PushMonitorConfig: offline instance tolerance
// ═══════════════════════════════════════════════════════════════════════════════

/// Thresholds for tolerating offline consumers of a pushed version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMonitorConfig {
    /// How long too many instances may stay offline before the push errors.
    #[serde(default = "default_offline_error_wait")]
    pub offline_error_wait: String,

    #[serde(default = "default_max_offline_instance_count")]
    pub max_offline_instance_count: usize,

    #[serde(default = "default_max_offline_instance_ratio")]
    pub max_offline_instance_ratio: f64,
}

fn default_offline_error_wait() -> String {
    "5m".to_string()
}

fn default_max_offline_instance_count() -> usize {
    10
}

fn default_max_offline_instance_ratio() -> f64 {
    0.1
}

impl Default for PushMonitorConfig {
    fn default() -> Self {
        Self {
            offline_error_wait: default_offline_error_wait(),
            max_offline_instance_count: default_max_offline_instance_count(),
            max_offline_instance_ratio: default_max_offline_instance_ratio(),
        }
    }
}

impl PushMonitorConfig {
    /// Parse the wait string to a Duration, falling back to five minutes.
    pub fn offline_error_wait_duration(&self) -> Duration {
        humantime::parse_duration(&self.offline_error_wait).unwrap_or(Duration::from_secs(300))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WritePathConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.chunking.enabled);
        assert_eq!(config.chunking.max_chunk_size_bytes, 950 * 1024);
        assert_eq!(config.persistence.drainer_count, 4);
        assert_eq!(config.persistence.queue_capacity, 1024);
    }

    #[test]
    fn test_version_topic() {
        let store = StoreConfig::for_testing("profiles", 7);
        assert_eq!(store.version_topic(), "profiles_v7");
        assert!(store.ingestion_task_name().contains("profiles_v7"));
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = WritePathConfig::default();
        config.chunking.max_chunk_size_bytes = 0;
        assert!(matches!(config.validate(), Err(WritePathError::Config(_))));

        // Irrelevant when chunking is off
        config.chunking.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_drainers_and_capacity() {
        let mut config = WritePathConfig::default();
        config.persistence.drainer_count = 0;
        assert!(config.validate().is_err());

        let mut config = WritePathConfig::default();
        config.persistence.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let mut config = WritePathConfig::default();
        config.push_monitor.max_offline_instance_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_store_name() {
        let mut config = WritePathConfig::default();
        config.store.store_name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_filter_window_parsing() {
        let test_cases = [
            ("1h", Duration::from_secs(3600)),
            ("30s", Duration::from_secs(30)),
            ("250ms", Duration::from_millis(250)),
            ("garbage", Duration::from_secs(3600)),
        ];
        for (input, expected) in test_cases {
            let config = LogFilterConfig {
                window: input.to_string(),
            };
            assert_eq!(config.window_duration(), expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn test_offline_error_wait_parsing() {
        let config = PushMonitorConfig::default();
        assert_eq!(config.offline_error_wait_duration(), Duration::from_secs(300));

        let config = PushMonitorConfig {
            offline_error_wait: "not a duration".to_string(),
            ..Default::default()
        };
        assert_eq!(config.offline_error_wait_duration(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "store": { "store_name": "s", "version": 2 }, "chunking": { "max_chunk_size_bytes": 100 } }"#;
        let config: WritePathConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.store.store_name, "s");
        assert_eq!(config.store.version, 2);
        assert!(!config.store.hybrid);
        assert!(config.chunking.enabled);
        assert!(config.chunking.rmd_chunking_enabled);
        assert_eq!(config.chunking.max_chunk_size_bytes, 100);
        assert_eq!(config.persistence.drainer_count, 4);
        assert_eq!(config.log_filter.window, "1h");
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = WritePathConfig::for_testing("roundtrip", 9);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: WritePathConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.store.store_name, "roundtrip");
        assert_eq!(parsed.store.version, 9);
        assert!(parsed.store.hybrid);
        assert_eq!(parsed.chunking.max_chunk_size_bytes, 16);
        assert_eq!(parsed.persistence.drainer_count, 2);
    }
}
