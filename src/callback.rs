// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Leader producer completion pipeline.
//!
//! One [`LeaderProducerCallback`] exists per record the leader produces.
//! When the output log acknowledges the record (or the manifest of a
//! chunked record), the callback turns the acknowledgement into records
//! for the persistence queue.
//!
//! # Acknowledged
//!
//! ```text
//! validate chunks vs manifests ──► stamp time, record latency
//!   ├─ unchunked: record(offset = ack) ─────────────────────────────► queue
//!   └─ chunked:   value chunks(-1) ─► rmd chunks(-1) ─► manifest(ack) ─► queue
//! then: delete superseded chunks the new manifests no longer use ──► queue
//! then: bytes/records stats (store version + host)
//! ```
//!
//! Chunks are enqueued strictly before their manifest. The manifest carries
//! the real acknowledgement offset and the caller's persisted signal, so
//! the caller only sees the write as done once the manifest is applied.
//!
//! # Failed
//!
//! Transport failures are counted, logged through the redundant log filter
//! and, while the partition is still in its bulk load, escalated to the
//! ingestion task. After end-of-bulk-load the version already serves reads
//! and the failure is only logged.
//!
//! Failures while processing an acknowledgement follow the same escalation
//! policy but are always logged with full context. Fatal errors
//! ([`WritePathError::is_fatal`]) are returned to the caller.
//!
//! # Idempotence
//!
//! The produced record is taken out of the callback on the first
//! acknowledgement. A replayed acknowledgement finds nothing to enqueue and
//! is ignored, so superseded chunks are deleted at most once.

use crate::buffer::PersistenceQueue;
use crate::chunking::{ChunkedValueManifest, ChunkingInfo, CHUNKED_VALUE_MANIFEST_SCHEMA_ID};
use crate::config::StoreConfig;
use crate::error::{Result, WritePathError};
use crate::log_filter::RedundantLogFilter;
use crate::output_log::{CallbackFuture, ProduceCallback, ProduceResult};
use crate::partition::{IngestionTaskRef, PartitionConsumptionState};
use crate::record::{now_ms, PersistedSignal, ProducedRecordContext, PutPayload, WritePayload};
use crate::stats::IngestionStats;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Collaborators shared by every callback of one store version.
pub struct LeaderContext {
    pub store: StoreConfig,
    pub ingestion_task: Arc<dyn IngestionTaskRef>,
    pub persistence: Arc<dyn PersistenceQueue>,
    pub stats: Arc<IngestionStats>,
    pub log_filter: Arc<RedundantLogFilter>,
}

/// Where the produced record was consumed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecordInfo {
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    /// Timestamp set by the original producer of the consumed record.
    pub producer_timestamp_ms: i64,
    /// Consumed from a real-time (nearline) topic rather than a batch push.
    pub from_real_time: bool,
}

/// Hook run before any processing of an acknowledgement.
pub type CompletionHook = Box<dyn Fn(&Result<ProduceResult>) + Send + Sync>;

/// Completion callback for one produced record.
pub struct LeaderProducerCallback {
    ctx: Arc<LeaderContext>,
    partition_state: Arc<PartitionConsumptionState>,
    source: SourceRecordInfo,
    pending: Mutex<Option<ProducedRecordContext>>,
    produce_started: Instant,
    hook: OnceLock<CompletionHook>,
}

#[derive(Default)]
struct ProducedTally {
    bytes: u64,
    records: u64,
}

impl ProducedTally {
    fn add(&mut self, record: &ProducedRecordContext) {
        self.add_bytes(record.key.len() + record.payload.size_bytes());
    }

    fn add_bytes(&mut self, bytes: usize) {
        self.bytes += bytes as u64;
        self.records += 1;
    }
}

impl LeaderProducerCallback {
    pub fn new(
        ctx: Arc<LeaderContext>,
        partition_state: Arc<PartitionConsumptionState>,
        source: SourceRecordInfo,
        record: ProducedRecordContext,
    ) -> Self {
        Self {
            ctx,
            partition_state,
            source,
            pending: Mutex::new(Some(record)),
            produce_started: Instant::now(),
            hook: OnceLock::new(),
        }
    }

    /// Install the completion hook. Can only be set once.
    pub fn set_on_completion_hook(&self, hook: CompletionHook) -> Result<()> {
        self.hook
            .set(hook)
            .map_err(|_| WritePathError::Internal("completion hook already set".to_string()))
    }

    pub fn source(&self) -> &SourceRecordInfo {
        &self.source
    }

    /// Whether the produced record is still waiting for its acknowledgement.
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    fn take_pending(&self) -> Option<ProducedRecordContext> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn store_name(&self) -> &str {
        &self.ctx.store.store_name
    }

    fn version(&self) -> u32 {
        self.ctx.store.version
    }

    /// Attach the manifests of this write to the key's transient record as
    /// soon as they are known, so the next resolution of the key sees them.
    pub fn on_chunking_info(&self, info: &ChunkingInfo) {
        if info.value_manifest.is_none() && info.rmd_manifest.is_none() {
            return;
        }
        let updated = self
            .partition_state
            .transient_cache()
            .map(|cache| cache.update_manifests(&info.key, info.value_manifest.clone(), info.rmd_manifest.clone()))
            .unwrap_or(false);
        if !updated {
            self.ctx.stats.record_transient_record_miss(self.store_name(), self.version());
            let message = format!(
                "Transient record missing for chunked write in {}",
                self.partition_state.replica_id()
            );
            if !self.ctx.log_filter.is_redundant(&message) {
                warn!(
                    replica = %self.partition_state.replica_id(),
                    key = %hex::encode(&info.key),
                    "Transient record missing, chunk manifests not cached"
                );
            }
        }
    }

    /// Handle the output log's verdict on the produced record.
    ///
    /// Returns an error only for fatal failures; everything else is
    /// resolved here through escalation, logging and metrics.
    pub async fn on_completion(&self, result: Result<ProduceResult>, chunking: ChunkingInfo) -> Result<()> {
        if let Some(hook) = self.hook.get() {
            hook(&result);
        }
        let started = Instant::now();

        let outcome = match result {
            Err(err) => {
                let record = self.take_pending();
                self.handle_produce_failure(err, record)
            }
            Ok(ack) => match self.take_pending() {
                None => {
                    debug!(
                        replica = %self.partition_state.replica_id(),
                        consumed_offset = self.source.offset,
                        produced_offset = ack.offset,
                        "Ignoring duplicate acknowledgement"
                    );
                    Ok(())
                }
                Some(mut record) => {
                    let mut signal = record.take_persisted_signal();
                    match self.process_ack(record, &mut signal, ack, chunking).await {
                        Ok(()) => Ok(()),
                        Err(err) => self.handle_internal_failure(err, signal),
                    }
                }
            },
        };

        if !self.ctx.store.user_system_store {
            self.ctx
                .stats
                .record_producer_callback_latency(self.store_name(), self.version(), started.elapsed());
        }
        outcome
    }

    /// A chunk of this record failed to produce. The record itself stays
    /// pending; its manifest acknowledgement still arrives separately.
    pub fn on_chunk_failure(&self, err: WritePathError) -> Result<()> {
        self.handle_produce_failure(err, None)
    }

    async fn process_ack(
        &self,
        mut record: ProducedRecordContext,
        signal: &mut Option<PersistedSignal>,
        ack: ProduceResult,
        chunking: ChunkingInfo,
    ) -> Result<()> {
        chunking.validate()?;
        let orphaned_chunk_keys = chunking.orphaned_chunk_keys();

        record.set_produced_timestamp_ms(now_ms());
        self.record_latencies(record.produced_timestamp_ms);

        let ChunkingInfo {
            value_chunks,
            value_manifest,
            rmd_chunks,
            rmd_manifest,
            ..
        } = chunking;
        let mut produced = ProducedTally::default();

        match value_manifest {
            None => {
                record.set_produced_offset(ack.offset);
                record.set_persisted_signal(signal.take());
                produced.add_bytes(ack.serialized_size);
                self.enqueue(record).await?;
            }
            Some(value_manifest) => {
                self.enqueue_chunks(&value_manifest, value_chunks.unwrap_or_default(), &mut produced)
                    .await?;
                if let Some(rmd_manifest) = &rmd_manifest {
                    self.enqueue_chunks(rmd_manifest, rmd_chunks.unwrap_or_default(), &mut produced)
                        .await?;
                }
                let manifest_record =
                    build_manifest_record(&record, &value_manifest, rmd_manifest.as_ref(), ack.offset, signal)?;
                produced.add(&manifest_record);
                self.enqueue(manifest_record).await?;
            }
        }

        let deleted = self.enqueue_chunk_deletions(orphaned_chunk_keys).await?;
        if deleted > 0 {
            self.ctx
                .stats
                .record_chunk_deletions(self.store_name(), self.version(), deleted);
        }

        self.ctx
            .stats
            .record_leader_produced(self.store_name(), self.version(), produced.bytes, produced.records);
        Ok(())
    }

    fn record_latencies(&self, produced_timestamp_ms: i64) {
        let store = &self.ctx.store;
        if store.user_system_store {
            return;
        }
        self.ctx.stats.record_producer_completion_latency(
            &store.store_name,
            store.version,
            self.produce_started.elapsed(),
        );

        if store.hybrid
            && self.source.from_real_time
            && self.partition_state.is_lag_caught_up()
        {
            let latency_ms = (produced_timestamp_ms - self.source.producer_timestamp_ms).max(0) as u64;
            self.ctx
                .stats
                .record_nearline_latency(&store.store_name, store.version, latency_ms);
        }
    }

    async fn enqueue(&self, record: ProducedRecordContext) -> Result<()> {
        self.ctx
            .persistence
            .enqueue(Arc::clone(&self.partition_state), record)
            .await
    }

    async fn enqueue_chunks(
        &self,
        manifest: &ChunkedValueManifest,
        chunks: Vec<Vec<u8>>,
        produced: &mut ProducedTally,
    ) -> Result<()> {
        for (chunk_key, chunk) in manifest.keys_with_chunk_id_suffix.iter().zip(chunks) {
            let chunk_record = ProducedRecordContext::new_chunk_put(chunk_key.clone(), chunk);
            produced.add(&chunk_record);
            self.enqueue(chunk_record).await?;
        }
        Ok(())
    }

    async fn enqueue_chunk_deletions(&self, chunk_keys: Vec<Vec<u8>>) -> Result<u64> {
        let mut deleted = 0;
        for chunk_key in chunk_keys {
            self.enqueue(ProducedRecordContext::new_chunk_delete(chunk_key)).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn end_of_bulk_load_received(&self) -> bool {
        self.ctx
            .ingestion_task
            .is_end_of_bulk_load_received(self.partition_state.partition())
    }

    fn escalate(&self, err: &WritePathError) {
        if self.end_of_bulk_load_received() {
            return;
        }
        let partition = self.partition_state.partition();
        if let Err(escalation_err) = self.ctx.ingestion_task.set_ingestion_exception(partition, err) {
            warn!(
                replica = %self.partition_state.replica_id(),
                error = %escalation_err,
                "Could not fail partition, recording store-level failure"
            );
            self.ctx.ingestion_task.set_last_store_ingestion_exception(err);
        }
    }

    fn handle_produce_failure(&self, err: WritePathError, record: Option<ProducedRecordContext>) -> Result<()> {
        self.ctx
            .stats
            .record_leader_producer_failure(self.store_name(), self.version());

        let message = format!(
            "Leader failed to produce to {}: {}",
            self.partition_state.replica_id(),
            err
        );
        if !self.ctx.log_filter.is_redundant(&message) {
            error!(
                replica = %self.partition_state.replica_id(),
                consumed_offset = self.source.offset,
                end_of_push = self.end_of_bulk_load_received(),
                error = %err,
                "Leader failed to send record to output log"
            );
        }

        self.escalate(&err);
        if let Some(record) = record {
            // The record never reached the log; later records for the key
            // must resolve against storage again.
            if let Some(cache) = self.partition_state.transient_cache() {
                cache.remove_if_offset(&record.key, record.consumed_offset);
            }
            record.complete(Err(err.clone()));
        }

        if err.is_interrupted() {
            Err(err)
        } else {
            Ok(())
        }
    }

    fn handle_internal_failure(&self, err: WritePathError, signal: Option<PersistedSignal>) -> Result<()> {
        error!(
            replica = %self.partition_state.replica_id(),
            end_of_push = self.end_of_bulk_load_received(),
            consumed_topic = %self.source.topic,
            consumed_partition = self.source.partition,
            consumed_offset = self.source.offset,
            error = %err,
            "Failed to process producer acknowledgement"
        );

        self.escalate(&err);
        if let Some(signal) = signal {
            signal.complete(Err(err.clone()));
        }

        if err.is_fatal() {
            Err(err)
        } else {
            Ok(())
        }
    }
}

/// Manifest record committing a chunked value. Takes over the caller's
/// persisted signal.
fn build_manifest_record(
    record: &ProducedRecordContext,
    value_manifest: &ChunkedValueManifest,
    rmd_manifest: Option<&ChunkedValueManifest>,
    ack_offset: i64,
    signal: &mut Option<PersistedSignal>,
) -> Result<ProducedRecordContext> {
    let WritePayload::Put(put) = &record.payload else {
        return Err(WritePathError::Consistency(
            "delete carries a chunked value manifest".to_string(),
        ));
    };
    let (rmd_version_id, rmd_payload) = match rmd_manifest {
        Some(manifest) => (CHUNKED_VALUE_MANIFEST_SCHEMA_ID, manifest.encode()?),
        None => (put.rmd_version_id, put.rmd_payload.clone()),
    };
    let manifest_put = PutPayload {
        value: value_manifest.encode()?,
        schema_id: CHUNKED_VALUE_MANIFEST_SCHEMA_ID,
        rmd_version_id,
        rmd_payload,
    };

    let mut manifest_record = ProducedRecordContext::new_put_with_signal(
        record.consumed_region_id,
        record.consumed_offset,
        record.key.clone(),
        manifest_put,
        signal.take(),
    );
    manifest_record.set_produced_offset(ack_offset);
    manifest_record.set_produced_timestamp_ms(record.produced_timestamp_ms);
    Ok(manifest_record)
}

/// Output log callback for the record (or manifest) itself.
pub struct LeaderCompletion {
    callback: Arc<LeaderProducerCallback>,
    chunking: ChunkingInfo,
}

impl LeaderCompletion {
    pub fn new(callback: Arc<LeaderProducerCallback>, chunking: ChunkingInfo) -> Self {
        Self { callback, chunking }
    }
}

impl ProduceCallback for LeaderCompletion {
    fn on_completion(self: Box<Self>, result: Result<ProduceResult>) -> CallbackFuture {
        Box::pin(async move {
            let Self { callback, chunking } = *self;
            if let Err(e) = callback.on_completion(result, chunking).await {
                debug!(error = %e, "Completion callback ended with a fatal error");
            }
        })
    }
}

/// Output log callback for an individual chunk: only failures matter.
pub struct ChunkFailureCompletion {
    callback: Arc<LeaderProducerCallback>,
}

impl ChunkFailureCompletion {
    pub fn new(callback: Arc<LeaderProducerCallback>) -> Self {
        Self { callback }
    }
}

impl ProduceCallback for ChunkFailureCompletion {
    fn on_completion(self: Box<Self>, result: Result<ProduceResult>) -> CallbackFuture {
        Box::pin(async move {
            if let Err(err) = result {
                if let Err(e) = self.callback.on_chunk_failure(err) {
                    debug!(error = %e, "Chunk failure callback ended with a fatal error");
                }
            }
        })
    }
}
