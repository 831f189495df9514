//! In-process ingestion stats aggregators.
//!
//! Every value recorded here is also forwarded to the [`crate::metrics`]
//! facade. The aggregators exist so operators and tests can read current
//! totals without installing a metrics recorder.
//!
//! Completion callbacks for many partitions run concurrently, so the
//! per store-version registry is a `DashMap` of atomic counters.

use crate::metrics::{self, DcrOutcome};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters for one store version.
#[derive(Debug, Default)]
pub struct VersionIngestionStats {
    leader_producer_failures: AtomicU64,
    leader_bytes_produced: AtomicU64,
    leader_records_produced: AtomicU64,
    superseded_chunk_deletions: AtomicU64,
    transient_record_misses: AtomicU64,
    dcr_applied: AtomicU64,
    dcr_update_ignored: AtomicU64,
    dcr_tombstone_created: AtomicU64,
    producer_completion_latency_samples: AtomicU64,
    producer_callback_latency_samples: AtomicU64,
}

/// Snapshot of [`VersionIngestionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionStatsSnapshot {
    pub leader_producer_failures: u64,
    pub leader_bytes_produced: u64,
    pub leader_records_produced: u64,
    pub superseded_chunk_deletions: u64,
    pub transient_record_misses: u64,
    pub dcr_applied: u64,
    pub dcr_update_ignored: u64,
    pub dcr_tombstone_created: u64,
    pub producer_completion_latency_samples: u64,
    pub producer_callback_latency_samples: u64,
}

impl VersionIngestionStats {
    pub fn snapshot(&self) -> VersionStatsSnapshot {
        VersionStatsSnapshot {
            leader_producer_failures: self.leader_producer_failures.load(Ordering::Relaxed),
            leader_bytes_produced: self.leader_bytes_produced.load(Ordering::Relaxed),
            leader_records_produced: self.leader_records_produced.load(Ordering::Relaxed),
            superseded_chunk_deletions: self.superseded_chunk_deletions.load(Ordering::Relaxed),
            transient_record_misses: self.transient_record_misses.load(Ordering::Relaxed),
            dcr_applied: self.dcr_applied.load(Ordering::Relaxed),
            dcr_update_ignored: self.dcr_update_ignored.load(Ordering::Relaxed),
            dcr_tombstone_created: self.dcr_tombstone_created.load(Ordering::Relaxed),
            producer_completion_latency_samples: self.producer_completion_latency_samples.load(Ordering::Relaxed),
            producer_callback_latency_samples: self.producer_callback_latency_samples.load(Ordering::Relaxed),
        }
    }
}

/// Host-wide totals across all store versions.
#[derive(Debug, Default)]
pub struct HostIngestionStats {
    total_leader_bytes_produced: AtomicU64,
    total_leader_records_produced: AtomicU64,
}

impl HostIngestionStats {
    pub fn total_leader_bytes_produced(&self) -> u64 {
        self.total_leader_bytes_produced.load(Ordering::Relaxed)
    }

    pub fn total_leader_records_produced(&self) -> u64 {
        self.total_leader_records_produced.load(Ordering::Relaxed)
    }
}

/// Registry of per store-version stats plus host totals.
#[derive(Debug, Default)]
pub struct IngestionStats {
    versions: DashMap<(String, u32), Arc<VersionIngestionStats>>,
    host: HostIngestionStats,
}

impl IngestionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for a store version, created on first use.
    pub fn version(&self, store: &str, version: u32) -> Arc<VersionIngestionStats> {
        if let Some(existing) = self.versions.get(&(store.to_string(), version)) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.versions
                .entry((store.to_string(), version))
                .or_default()
                .value(),
        )
    }

    /// Snapshot for a store version (all zeros if never recorded).
    pub fn snapshot(&self, store: &str, version: u32) -> VersionStatsSnapshot {
        self.versions
            .get(&(store.to_string(), version))
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    pub fn host(&self) -> &HostIngestionStats {
        &self.host
    }

    pub fn record_leader_producer_failure(&self, store: &str, version: u32) {
        self.version(store, version)
            .leader_producer_failures
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_leader_producer_failure(store, version);
    }

    /// Record production for a store version and the host totals.
    pub fn record_leader_produced(&self, store: &str, version: u32, bytes: u64, records: u64) {
        let stats = self.version(store, version);
        stats.leader_bytes_produced.fetch_add(bytes, Ordering::Relaxed);
        stats.leader_records_produced.fetch_add(records, Ordering::Relaxed);
        metrics::record_leader_produced(store, version, bytes, records);

        self.host
            .total_leader_bytes_produced
            .fetch_add(bytes, Ordering::Relaxed);
        self.host
            .total_leader_records_produced
            .fetch_add(records, Ordering::Relaxed);
        metrics::record_total_leader_produced(bytes, records);
    }

    pub fn record_producer_completion_latency(&self, store: &str, version: u32, latency: Duration) {
        self.version(store, version)
            .producer_completion_latency_samples
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_producer_completion_latency(store, version, latency);
    }

    pub fn record_nearline_latency(&self, store: &str, version: u32, latency_ms: u64) {
        metrics::record_nearline_producer_to_local_broker_latency(store, version, latency_ms);
    }

    pub fn record_producer_callback_latency(&self, store: &str, version: u32, latency: Duration) {
        self.version(store, version)
            .producer_callback_latency_samples
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_producer_callback_latency(store, version, latency);
    }

    pub fn record_chunk_deletions(&self, store: &str, version: u32, count: u64) {
        self.version(store, version)
            .superseded_chunk_deletions
            .fetch_add(count, Ordering::Relaxed);
        metrics::record_chunk_deletions(store, version, count);
    }

    pub fn record_transient_record_miss(&self, store: &str, version: u32) {
        self.version(store, version)
            .transient_record_misses
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_transient_record_miss(store, version);
    }

    pub fn record_dcr(&self, store: &str, version: u32, outcome: DcrOutcome) {
        let stats = self.version(store, version);
        let counter = match outcome {
            DcrOutcome::Applied => &stats.dcr_applied,
            DcrOutcome::UpdateIgnored => &stats.dcr_update_ignored,
            DcrOutcome::TombstoneCreated => &stats.dcr_tombstone_created,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_dcr(store, version, outcome);
    }
}
