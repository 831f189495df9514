// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-partition consumption state and the ingestion task collaborator.
//!
//! [`PartitionConsumptionState`] is shared between the leader consuming a
//! partition, the completion callbacks for its produced records and the
//! persistence drainer that applies them. Everything in it is atomic or
//! internally synchronized.
//!
//! Unsubscribing a partition is the only cancellation unit: it flips a
//! `watch` channel that blocked enqueues and drainers observe.

use crate::error::{Result, WritePathError};
use crate::metrics;
use crate::transient::TransientRecordCache;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info};

/// Mutable state of one partition being consumed by a leader.
#[derive(Debug)]
pub struct PartitionConsumptionState {
    topic: String,
    partition: u32,
    end_of_push_received: AtomicBool,
    lag_caught_up: AtomicBool,
    transient: Option<TransientRecordCache>,
    latest_persisted_offset: AtomicI64,
    unsubscribed: watch::Sender<bool>,
}

impl PartitionConsumptionState {
    /// Create state for a partition, with or without a transient record cache.
    pub fn new(topic: impl Into<String>, partition: u32, transient_cache_enabled: bool) -> Self {
        let (unsubscribed, _) = watch::channel(false);
        Self {
            topic: topic.into(),
            partition,
            end_of_push_received: AtomicBool::new(false),
            lag_caught_up: AtomicBool::new(false),
            transient: transient_cache_enabled.then(TransientRecordCache::new),
            latest_persisted_offset: AtomicI64::new(-1),
            unsubscribed,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// `{topic}-{partition}`, used in logs.
    pub fn replica_id(&self) -> String {
        format!("{}-{}", self.topic, self.partition)
    }

    /// Mark the end of the bulk load. From here on the version serves reads.
    pub fn set_end_of_push_received(&self) {
        self.end_of_push_received.store(true, Ordering::SeqCst);
    }

    pub fn is_end_of_push_received(&self) -> bool {
        self.end_of_push_received.load(Ordering::SeqCst)
    }

    pub fn set_lag_caught_up(&self, caught_up: bool) {
        self.lag_caught_up.store(caught_up, Ordering::Relaxed);
    }

    pub fn is_lag_caught_up(&self) -> bool {
        self.lag_caught_up.load(Ordering::Relaxed)
    }

    pub fn transient_cache(&self) -> Option<&TransientRecordCache> {
        self.transient.as_ref()
    }

    /// Highest produced offset applied to storage, -1 before the first.
    pub fn latest_persisted_offset(&self) -> i64 {
        self.latest_persisted_offset.load(Ordering::SeqCst)
    }

    /// Advance the persisted offset. Chunk sentinels (negative) are ignored.
    pub fn record_persisted_offset(&self, offset: i64) {
        if offset >= 0 {
            self.latest_persisted_offset.fetch_max(offset, Ordering::SeqCst);
        }
    }

    /// Tear down the partition: blocked enqueues are interrupted and queued
    /// records are dropped.
    pub fn unsubscribe(&self) {
        self.unsubscribed.send_replace(true);
        info!(replica = %self.replica_id(), "Partition unsubscribed");
    }

    pub fn is_unsubscribed(&self) -> bool {
        *self.unsubscribed.borrow()
    }

    /// Receiver that flips to `true` on unsubscribe.
    pub fn unsubscribe_signal(&self) -> watch::Receiver<bool> {
        self.unsubscribed.subscribe()
    }

    /// Resolves once the partition is unsubscribed (immediately if it
    /// already is).
    pub async fn wait_unsubscribed(&self) {
        let mut rx = self.unsubscribed.subscribe();
        let _ = rx.wait_for(|unsubscribed| *unsubscribed).await;
    }
}

/// What the write path needs from the owning ingestion task.
pub trait IngestionTaskRef: Send + Sync + 'static {
    /// Mark a partition failed. May itself fail (e.g. the task is closing).
    fn set_ingestion_exception(&self, partition: u32, err: &WritePathError) -> Result<()>;

    /// Record a failure against the whole store version. Used when
    /// partition-level escalation is not possible.
    fn set_last_store_ingestion_exception(&self, err: &WritePathError);

    /// Whether the partition finished its bulk load and serves reads.
    /// Failures after this point are no longer escalated.
    fn is_end_of_bulk_load_received(&self, partition: u32) -> bool;
}

/// In-process ingestion task that records partition failures.
#[derive(Debug)]
pub struct LocalIngestionTask {
    store: String,
    version: u32,
    partitions: DashMap<u32, Arc<PartitionConsumptionState>>,
    failures: DashMap<u32, String>,
    last_store_failure: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl LocalIngestionTask {
    pub fn new(store: impl Into<String>, version: u32) -> Self {
        Self {
            store: store.into(),
            version,
            partitions: DashMap::new(),
            failures: DashMap::new(),
            last_store_failure: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn register_partition(&self, state: Arc<PartitionConsumptionState>) {
        self.partitions.insert(state.partition(), state);
    }

    /// Stop accepting partition failures. Later escalations fail and fall
    /// back to the store-level exception.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_partition_failed(&self, partition: u32) -> bool {
        self.failures.contains_key(&partition)
    }

    pub fn partition_failure(&self, partition: u32) -> Option<String> {
        self.failures.get(&partition).map(|f| f.value().clone())
    }

    pub fn failed_partition_count(&self) -> usize {
        self.failures.len()
    }

    pub fn last_store_failure(&self) -> Option<String> {
        self.last_store_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl IngestionTaskRef for LocalIngestionTask {
    fn set_ingestion_exception(&self, partition: u32, err: &WritePathError) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WritePathError::Shutdown);
        }
        error!(
            store = %self.store,
            version = self.version,
            partition,
            error = %err,
            "Partition ingestion failed"
        );
        self.failures.insert(partition, err.to_string());
        metrics::set_ingestion_task_errored(&self.store, self.version, self.failures.len());
        Ok(())
    }

    fn set_last_store_ingestion_exception(&self, err: &WritePathError) {
        error!(store = %self.store, version = self.version, error = %err, "Store ingestion failed");
        *self
            .last_store_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(err.to_string());
    }

    fn is_end_of_bulk_load_received(&self, partition: u32) -> bool {
        self.partitions
            .get(&partition)
            .map(|state| state.is_end_of_push_received())
            .unwrap_or(false)
    }
}
