//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Leader production (bytes, records, failures)
//! - Producer acknowledgement and callback latency
//! - Conflict resolution outcomes
//! - Chunk garbage collection
//! - Persistence queue depth and apply latency
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `write_path_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! Per store-version metrics carry `store` and `version` labels. Host-level
//! totals carry no labels.
//!
//! # Usage
//!
//! ```rust,no_run
//! use replica_write_path::metrics;
//!
//! metrics::record_leader_produced("user_profiles", 3, 4096, 5);
//! metrics::record_total_leader_produced(4096, 5);
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Leader Production Metrics
// =============================================================================

/// Record a record the output log failed to accept.
pub fn record_leader_producer_failure(store: &str, version: u32) {
    counter!(
        "write_path_leader_producer_failures_total",
        "store" => store.to_string(),
        "version" => version.to_string()
    )
    .increment(1);
}

/// Record bytes and records handed to the persistence queue for one acknowledgement.
pub fn record_leader_produced(store: &str, version: u32, bytes: u64, records: u64) {
    let store = store.to_string();
    let version = version.to_string();
    counter!(
        "write_path_leader_bytes_produced_total",
        "store" => store.clone(),
        "version" => version.clone()
    )
    .increment(bytes);
    counter!(
        "write_path_leader_records_produced_total",
        "store" => store,
        "version" => version
    )
    .increment(records);
}

/// Record host-wide production totals.
pub fn record_total_leader_produced(bytes: u64, records: u64) {
    counter!("write_path_total_leader_bytes_produced_total").increment(bytes);
    counter!("write_path_total_leader_records_produced_total").increment(records);
}

/// Record time from produce call to log acknowledgement.
pub fn record_producer_completion_latency(store: &str, version: u32, latency: Duration) {
    histogram!(
        "write_path_leader_producer_completion_seconds",
        "store" => store.to_string(),
        "version" => version.to_string()
    )
    .record(latency.as_secs_f64());
}

/// Record time from the original nearline producer to local broker acknowledgement.
pub fn record_nearline_producer_to_local_broker_latency(store: &str, version: u32, latency_ms: u64) {
    histogram!(
        "write_path_nearline_producer_to_local_broker_ms",
        "store" => store.to_string(),
        "version" => version.to_string()
    )
    .record(latency_ms as f64);
}

/// Record how long the completion callback itself took.
pub fn record_producer_callback_latency(store: &str, version: u32, latency: Duration) {
    histogram!(
        "write_path_producer_callback_seconds",
        "store" => store.to_string(),
        "version" => version.to_string()
    )
    .record(latency.as_secs_f64());
}

// =============================================================================
// Chunking Metrics
// =============================================================================

/// Record chunk deletions queued for a superseded manifest.
pub fn record_chunk_deletions(store: &str, version: u32, count: u64) {
    if count == 0 {
        return;
    }
    counter!(
        "write_path_superseded_chunk_deletions_total",
        "store" => store.to_string(),
        "version" => version.to_string()
    )
    .increment(count);
}

/// Record a transient record that was expected but absent.
pub fn record_transient_record_miss(store: &str, version: u32) {
    counter!(
        "write_path_transient_record_misses_total",
        "store" => store.to_string(),
        "version" => version.to_string()
    )
    .increment(1);
}

// =============================================================================
// Conflict Resolution Metrics
// =============================================================================

/// Conflict resolution outcome label values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcrOutcome {
    /// Incoming write won and will be produced.
    Applied,
    /// Incoming write lost and was dropped.
    UpdateIgnored,
    /// Incoming delete won and produced a tombstone.
    TombstoneCreated,
}

impl DcrOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::UpdateIgnored => "update_ignored",
            Self::TombstoneCreated => "tombstone_created",
        }
    }
}

/// Record one conflict resolution.
pub fn record_dcr(store: &str, version: u32, outcome: DcrOutcome) {
    counter!(
        "write_path_dcr_total",
        "store" => store.to_string(),
        "version" => version.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

// =============================================================================
// Ingestion Task Metrics
// =============================================================================

/// Set the number of partitions currently failed for a store version.
pub fn set_ingestion_task_errored(store: &str, version: u32, failed_partitions: usize) {
    gauge!(
        "write_path_ingestion_task_errored",
        "store" => store.to_string(),
        "version" => version.to_string()
    )
    .set(failed_partitions as f64);
}

// =============================================================================
// Persistence Queue Metrics
// =============================================================================

/// Record the depth of a drainer queue after an enqueue.
pub fn set_drainer_queue_depth(drainer: usize, depth: usize) {
    gauge!("write_path_drainer_queue_depth", "drainer" => drainer.to_string()).set(depth as f64);
}

/// Record how long a record waited in the queue and was applied.
pub fn record_drainer_apply(drainer: usize, queued_for: Duration, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "write_path_drainer_applied_total",
        "drainer" => drainer.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!("write_path_drainer_queue_wait_seconds", "drainer" => drainer.to_string())
        .record(queued_for.as_secs_f64());
}

/// Record a record dropped because its partition was unsubscribed.
pub fn record_drainer_dropped_unsubscribed(drainer: usize) {
    counter!(
        "write_path_drainer_unsubscribed_drops_total",
        "drainer" => drainer.to_string()
    )
    .increment(1);
}
