// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Leader write path: conflict resolution in front of the chunking writer.
//!
//! For every consumed record the leader decides whether the record beats
//! the current state of its key, and if so produces the merged result.
//!
//! ```text
//! ConsumedRecord
//!   │
//!   ├─ current state: transient cache ─(miss)─► storage (chunks reassembled)
//!   │
//!   ├─ compare timestamps ─(lower)───────────────► Ignored
//!   │        │ (equal)
//!   │        └─ tie-break (delete wins, then strategy) ─(loses)─► Ignored
//!   │
//!   └─ wins: merge offset vector ─► cache transient record ─► ChunkingWriter
//!                                                      └──► Produced(PersistedFuture)
//! ```
//!
//! The transient record is cached before producing so the next record for
//! the same key resolves against this write rather than the stale stored
//! value. The drainer evicts it once the write is applied.

use crate::callback::{LeaderContext, LeaderProducerCallback, SourceRecordInfo};
use crate::chunking::{assemble_record, ChunkedValueManifest, ChunkingInfo};
use crate::error::Result;
use crate::merge::{extract_timestamps, merge_offset_vector, pick_winner, FingerprintTieBreaker, TieBreaker, Winner};
use crate::metrics::DcrOutcome;
use crate::output_log::OutputLog;
use crate::partition::PartitionConsumptionState;
use crate::record::{DeletePayload, PersistedFuture, ProducedRecordContext, PutPayload, WritePayload, NO_RMD_VERSION_ID};
use crate::rmd::{ReplicationMetadata, RMD_VERSION_ID};
use crate::storage::StorageEngineRef;
use crate::transient::TransientRecord;
use crate::writer::ChunkingWriter;
use std::sync::Arc;
use tracing::{debug, trace};

/// Operation carried by a consumed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumedOperation {
    Put { value: Vec<u8>, schema_id: i32 },
    Delete,
}

/// A record consumed from a source region's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    /// Region the record came from; negative when unknown.
    pub source_region_id: i32,
    pub key: Vec<u8>,
    pub operation: ConsumedOperation,
    /// Logical write timestamp used for conflict resolution.
    pub logical_timestamp: i64,
    pub producer_timestamp_ms: i64,
    pub from_real_time: bool,
}

impl ConsumedRecord {
    fn incoming_value(&self) -> Option<&[u8]> {
        match &self.operation {
            ConsumedOperation::Put { value, .. } => Some(value),
            ConsumedOperation::Delete => None,
        }
    }
}

/// Result of processing one consumed record.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The record won and was produced; resolves once applied to storage.
    Produced(PersistedFuture),
    /// The record lost conflict resolution.
    Ignored,
}

impl WriteOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, WriteOutcome::Ignored)
    }
}

/// Current state of a key as seen by conflict resolution.
struct ExistingState {
    value: Option<Vec<u8>>,
    schema_id: i32,
    rmd: Option<ReplicationMetadata>,
    value_manifest: Option<ChunkedValueManifest>,
    rmd_manifest: Option<ChunkedValueManifest>,
}

/// Drives conflict resolution and production for one store version.
pub struct LeaderWritePath {
    ctx: Arc<LeaderContext>,
    writer: ChunkingWriter<dyn OutputLog>,
    storage: Arc<dyn StorageEngineRef>,
    tie_breaker: Arc<dyn TieBreaker<[u8]>>,
}

impl LeaderWritePath {
    pub fn new(ctx: Arc<LeaderContext>, writer: ChunkingWriter<dyn OutputLog>, storage: Arc<dyn StorageEngineRef>) -> Self {
        Self {
            ctx,
            writer,
            storage,
            tie_breaker: Arc::new(FingerprintTieBreaker),
        }
    }

    /// Replace the equal-timestamp tie-break strategy.
    pub fn with_tie_breaker(mut self, tie_breaker: Arc<dyn TieBreaker<[u8]>>) -> Self {
        self.tie_breaker = tie_breaker;
        self
    }

    pub fn context(&self) -> &Arc<LeaderContext> {
        &self.ctx
    }

    /// Resolve `record` against the current state of its key and produce it
    /// if it wins.
    pub async fn process(
        &self,
        partition_state: &Arc<PartitionConsumptionState>,
        record: ConsumedRecord,
    ) -> Result<WriteOutcome> {
        let store = &self.ctx.store;
        let existing = self.load_existing(partition_state, &record.key).await?;

        if !self.incoming_wins(existing.as_ref(), &record) {
            trace!(
                replica = %partition_state.replica_id(),
                offset = record.offset,
                timestamp = record.logical_timestamp,
                "Consumed record lost conflict resolution"
            );
            self.ctx
                .stats
                .record_dcr(&store.store_name, store.version, DcrOutcome::UpdateIgnored);
            return Ok(WriteOutcome::Ignored);
        }

        let (existing_vector, existing_schema_id, old_value_manifest, old_rmd_manifest) = match existing {
            Some(state) => (
                state.rmd.map(|rmd| rmd.offset_vector).unwrap_or_default(),
                state.schema_id,
                state.value_manifest,
                state.rmd_manifest,
            ),
            None => (Vec::new(), NO_RMD_VERSION_ID, None, None),
        };
        let merged = ReplicationMetadata::root_level(record.logical_timestamp).with_offset_vector(merge_offset_vector(
            existing_vector,
            record.offset,
            record.source_region_id,
        ));
        let rmd_payload = merged.encode()?;

        let source = SourceRecordInfo {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            producer_timestamp_ms: record.producer_timestamp_ms,
            from_real_time: record.from_real_time,
        };
        let partition = partition_state.partition();
        let ConsumedRecord {
            key,
            operation,
            source_region_id,
            offset,
            ..
        } = record;

        let (context, future, outcome) = match operation {
            ConsumedOperation::Put { value, schema_id } => {
                cache_transient(partition_state, &key, Some(value.clone()), schema_id, &rmd_payload, offset);
                let put = PutPayload {
                    value,
                    schema_id,
                    rmd_version_id: RMD_VERSION_ID,
                    rmd_payload,
                };
                let (context, future) =
                    ProducedRecordContext::new_put_with_future(source_region_id, offset, key.clone(), put);
                (context, future, DcrOutcome::Applied)
            }
            ConsumedOperation::Delete => {
                cache_transient(partition_state, &key, None, existing_schema_id, &rmd_payload, offset);
                let delete = DeletePayload {
                    schema_id: existing_schema_id,
                    rmd_version_id: RMD_VERSION_ID,
                    rmd_payload,
                };
                let (context, future) =
                    ProducedRecordContext::new_delete_with_future(source_region_id, offset, key.clone(), delete);
                (context, future, DcrOutcome::TombstoneCreated)
            }
        };

        let payload = context.payload.clone();
        let callback = Arc::new(LeaderProducerCallback::new(
            Arc::clone(&self.ctx),
            Arc::clone(partition_state),
            source,
            context,
        ));
        let produced = match payload {
            WritePayload::Put(put) => self.writer.put(
                partition,
                &key,
                put,
                old_value_manifest,
                old_rmd_manifest,
                Arc::clone(&callback),
            ),
            WritePayload::Delete(delete) => self.writer.delete(
                partition,
                &key,
                delete,
                old_value_manifest,
                old_rmd_manifest,
                Arc::clone(&callback),
            ),
        };

        if let Err(err) = produced {
            debug!(
                replica = %partition_state.replica_id(),
                offset,
                error = %err,
                "Produce call rejected"
            );
            callback.on_completion(Err(err), ChunkingInfo::unchunked(key)).await?;
            return Ok(WriteOutcome::Produced(future));
        }

        self.ctx.stats.record_dcr(&store.store_name, store.version, outcome);
        Ok(WriteOutcome::Produced(future))
    }

    async fn load_existing(
        &self,
        partition_state: &PartitionConsumptionState,
        key: &[u8],
    ) -> Result<Option<ExistingState>> {
        if let Some(transient) = partition_state.transient_cache().and_then(|cache| cache.get(key)) {
            return Ok(Some(ExistingState {
                value: transient.value,
                schema_id: transient.value_schema_id,
                rmd: decode_rmd(&transient.rmd_payload)?,
                value_manifest: transient.value_manifest,
                rmd_manifest: transient.rmd_manifest,
            }));
        }

        let Some(stored) = assemble_record(self.storage.as_ref(), partition_state.partition(), key).await? else {
            return Ok(None);
        };
        Ok(Some(ExistingState {
            value: stored.value,
            schema_id: stored.schema_id,
            rmd: decode_rmd(&stored.rmd_payload)?,
            value_manifest: stored.value_manifest,
            rmd_manifest: stored.rmd_manifest,
        }))
    }

    fn incoming_wins(&self, existing: Option<&ExistingState>, record: &ConsumedRecord) -> bool {
        let Some(existing) = existing else {
            return true;
        };
        let existing_ts = extract_timestamps(existing.rmd.as_ref())[0];
        if record.logical_timestamp != existing_ts {
            return record.logical_timestamp > existing_ts;
        }
        pick_winner(existing.value.as_deref(), record.incoming_value(), self.tie_breaker.as_ref()) == Winner::Right
    }
}

fn decode_rmd(payload: &[u8]) -> Result<Option<ReplicationMetadata>> {
    if payload.is_empty() {
        return Ok(None);
    }
    ReplicationMetadata::decode(payload).map(Some)
}

fn cache_transient(
    partition_state: &PartitionConsumptionState,
    key: &[u8],
    value: Option<Vec<u8>>,
    schema_id: i32,
    rmd_payload: &[u8],
    consumed_offset: i64,
) {
    if let Some(cache) = partition_state.transient_cache() {
        cache.put(
            key.to_vec(),
            TransientRecord::new(value, schema_id, rmd_payload.to_vec(), consumed_offset),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StoreBufferService;
    use crate::config::{ChunkingConfig, PersistenceConfig, StoreConfig};
    use crate::log_filter::RedundantLogFilter;
    use crate::merge::BytewiseTieBreaker;
    use crate::output_log::InMemoryOutputLog;
    use crate::partition::LocalIngestionTask;
    use crate::stats::IngestionStats;
    use crate::storage::InMemoryStorageEngine;
    use std::time::Duration;

    struct Harness {
        leader: LeaderWritePath,
        storage: Arc<InMemoryStorageEngine>,
        state: Arc<PartitionConsumptionState>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(InMemoryStorageEngine::new());
        let buffer = StoreBufferService::start(&PersistenceConfig::for_testing(), storage.clone()).unwrap();
        let ctx = Arc::new(LeaderContext {
            store: StoreConfig::for_testing("store", 1),
            ingestion_task: Arc::new(LocalIngestionTask::new("store", 1)),
            persistence: Arc::new(buffer),
            stats: Arc::new(IngestionStats::new()),
            log_filter: Arc::new(RedundantLogFilter::new(Duration::from_secs(60))),
        });
        let log: Arc<dyn OutputLog> = Arc::new(InMemoryOutputLog::new("store_v1"));
        let writer = ChunkingWriter::new(log, ChunkingConfig::for_testing());
        Harness {
            leader: LeaderWritePath::new(ctx, writer, storage.clone()),
            storage,
            state: Arc::new(PartitionConsumptionState::new("store_v1", 0, true)),
        }
    }

    fn put(key: &[u8], value: &[u8], ts: i64, offset: i64) -> ConsumedRecord {
        ConsumedRecord {
            topic: "store_rt".to_string(),
            partition: 0,
            offset,
            source_region_id: 1,
            key: key.to_vec(),
            operation: ConsumedOperation::Put {
                value: value.to_vec(),
                schema_id: 5,
            },
            logical_timestamp: ts,
            producer_timestamp_ms: 0,
            from_real_time: true,
        }
    }

    fn delete(key: &[u8], ts: i64, offset: i64) -> ConsumedRecord {
        ConsumedRecord {
            operation: ConsumedOperation::Delete,
            ..put(key, b"", ts, offset)
        }
    }

    async fn apply(h: &Harness, record: ConsumedRecord) -> bool {
        match h.leader.process(&h.state, record).await.unwrap() {
            WriteOutcome::Produced(future) => {
                future.wait().await.unwrap();
                true
            }
            WriteOutcome::Ignored => false,
        }
    }

    #[tokio::test]
    async fn test_first_write_wins_and_persists() {
        let h = harness();
        assert!(apply(&h, put(b"k", b"v1", 10, 0)).await);

        let stored = assemble_record(h.storage.as_ref(), 0, b"k").await.unwrap().unwrap();
        assert_eq!(stored.value.as_deref(), Some(&b"v1"[..]));
        let rmd = ReplicationMetadata::decode(&stored.rmd_payload).unwrap();
        assert_eq!(rmd, ReplicationMetadata::root_level(10).with_offset_vector(vec![0, 0]));
        assert_eq!(h.leader.context().stats.snapshot("store", 1).dcr_applied, 1);
    }

    #[tokio::test]
    async fn test_older_timestamp_is_ignored() {
        let h = harness();
        assert!(apply(&h, put(b"k", b"new", 10, 0)).await);
        assert!(!apply(&h, put(b"k", b"old", 9, 1)).await);

        let value = crate::chunking::assemble_value(h.storage.as_ref(), 0, b"k").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"new"[..]));
        assert_eq!(h.leader.context().stats.snapshot("store", 1).dcr_update_ignored, 1);
    }

    #[tokio::test]
    async fn test_offset_vector_tracks_latest_offset_per_region() {
        let h = harness();
        assert!(apply(&h, put(b"k", b"a", 10, 4)).await);
        let mut other_region = put(b"k", b"b", 11, 7);
        other_region.source_region_id = 0;
        assert!(apply(&h, other_region).await);

        let stored = assemble_record(h.storage.as_ref(), 0, b"k").await.unwrap().unwrap();
        let rmd = ReplicationMetadata::decode(&stored.rmd_payload).unwrap();
        assert_eq!(rmd.offset_vector, vec![7, 4]);
    }

    #[tokio::test]
    async fn test_equal_timestamp_delete_wins() {
        let h = harness();
        assert!(apply(&h, put(b"k", b"v", 10, 0)).await);
        assert!(apply(&h, delete(b"k", 10, 1)).await);

        let stored = assemble_record(h.storage.as_ref(), 0, b"k").await.unwrap().unwrap();
        assert!(stored.value.is_none());
        assert!(!stored.rmd_payload.is_empty());
        assert_eq!(h.leader.context().stats.snapshot("store", 1).dcr_tombstone_created, 1);

        // A put with the same timestamp does not resurrect the tombstone.
        assert!(!apply(&h, put(b"k", b"again", 10, 2)).await);
    }

    #[tokio::test]
    async fn test_equal_timestamp_uses_tie_breaker() {
        let mut h = harness();
        h.leader = h.leader.with_tie_breaker(Arc::new(BytewiseTieBreaker));
        assert!(apply(&h, put(b"k", b"bbb", 10, 0)).await);
        assert!(!apply(&h, put(b"k", b"aaa", 10, 1)).await);
        // Equal content keeps the existing value.
        assert!(!apply(&h, put(b"k", b"bbb", 10, 2)).await);
        assert!(apply(&h, put(b"k", b"ccc", 10, 3)).await);
    }

    #[tokio::test]
    async fn test_chunked_value_roundtrips_and_replacement_collects_chunks() {
        let h = harness();
        let big: Vec<u8> = (0..50).collect();
        assert!(apply(&h, put(b"k", &big, 10, 0)).await);
        assert_eq!(
            crate::chunking::assemble_value(h.storage.as_ref(), 0, b"k").await.unwrap(),
            Some(big)
        );
        let chunk_count = h.storage.keys(0).await.len() - 1;
        assert!(chunk_count >= 4);

        assert!(apply(&h, put(b"k", b"small", 11, 1)).await);
        // Chunk deletions are queued behind the manifest; a later write on
        // the same partition drains them.
        assert!(apply(&h, put(b"z", b"x", 1, 2)).await);
        assert_eq!(h.storage.keys(0).await, vec![b"k".to_vec(), b"z".to_vec()]);
        assert_eq!(
            h.leader.context().stats.snapshot("store", 1).superseded_chunk_deletions,
            chunk_count as u64
        );
    }

    #[tokio::test]
    async fn test_resolves_against_transient_record_before_storage() {
        let h = harness();
        // Not awaited: the second record must see the first via the cache.
        let first = h.leader.process(&h.state, put(b"k", b"v1", 20, 0)).await.unwrap();
        let second = h.leader.process(&h.state, put(b"k", b"v0", 15, 1)).await.unwrap();
        assert!(second.is_ignored());
        if let WriteOutcome::Produced(future) = first {
            future.wait().await.unwrap();
        }
    }
}
