//! Wiring helpers.

use super::RecordingQueue;
use replica_write_path::buffer::PersistenceQueue;
use replica_write_path::callback::{LeaderContext, LeaderProducerCallback, SourceRecordInfo};
use replica_write_path::config::{ChunkingConfig, StoreConfig};
use replica_write_path::leader::{ConsumedOperation, ConsumedRecord};
use replica_write_path::log_filter::RedundantLogFilter;
use replica_write_path::output_log::InMemoryOutputLog;
use replica_write_path::partition::{LocalIngestionTask, PartitionConsumptionState};
use replica_write_path::record::{PersistedFuture, ProducedRecordContext, PutPayload};
use replica_write_path::rmd::RMD_VERSION_ID;
use replica_write_path::stats::IngestionStats;
use replica_write_path::writer::ChunkingWriter;
use std::sync::Arc;
use std::time::Duration;

pub const STORE: &str = "test_store";
pub const VERSION: u32 = 1;

/// Completion pipeline wired to a recording queue and an in-memory log.
pub struct PipelineFixture {
    pub queue: Arc<RecordingQueue>,
    pub task: Arc<LocalIngestionTask>,
    pub stats: Arc<IngestionStats>,
    pub ctx: Arc<LeaderContext>,
    pub log: Arc<InMemoryOutputLog>,
    pub writer: ChunkingWriter<InMemoryOutputLog>,
}

impl PipelineFixture {
    pub fn new() -> Self {
        let queue = Arc::new(RecordingQueue::new());
        let fixture_queue: Arc<dyn PersistenceQueue> = queue.clone();
        let (task, stats, ctx) = leader_context(fixture_queue);
        let log = Arc::new(InMemoryOutputLog::new(version_topic()));
        let writer = ChunkingWriter::with_sequence_start(Arc::clone(&log), ChunkingConfig::for_testing(), 1);
        Self {
            queue,
            task,
            stats,
            ctx,
            log,
            writer,
        }
    }

    pub fn partition(&self, partition: u32) -> Arc<PartitionConsumptionState> {
        let state = Arc::new(PartitionConsumptionState::new(version_topic(), partition, true));
        self.task.register_partition(Arc::clone(&state));
        state
    }

    /// A callback for a put of `value` under `key`, consumed at `offset`.
    pub fn put_callback(
        &self,
        state: &Arc<PartitionConsumptionState>,
        key: &[u8],
        value: &[u8],
        offset: i64,
    ) -> (Arc<LeaderProducerCallback>, PutPayload, PersistedFuture) {
        let put = put_payload(value);
        let (record, future) = ProducedRecordContext::new_put_with_future(0, offset, key.to_vec(), put.clone());
        let callback = LeaderProducerCallback::new(
            Arc::clone(&self.ctx),
            Arc::clone(state),
            source(state.partition(), offset),
            record,
        );
        (Arc::new(callback), put, future)
    }
}

pub fn version_topic() -> String {
    format!("{}_v{}", STORE, VERSION)
}

/// Leader context around the given persistence queue.
pub fn leader_context(
    persistence: Arc<dyn PersistenceQueue>,
) -> (Arc<LocalIngestionTask>, Arc<IngestionStats>, Arc<LeaderContext>) {
    let task = Arc::new(LocalIngestionTask::new(STORE, VERSION));
    let stats = Arc::new(IngestionStats::new());
    let ctx = Arc::new(LeaderContext {
        store: StoreConfig::for_testing(STORE, VERSION),
        ingestion_task: task.clone(),
        persistence,
        stats: Arc::clone(&stats),
        log_filter: Arc::new(RedundantLogFilter::new(Duration::from_secs(60))),
    });
    (task, stats, ctx)
}

pub fn put_payload(value: &[u8]) -> PutPayload {
    PutPayload {
        value: value.to_vec(),
        schema_id: 7,
        rmd_version_id: RMD_VERSION_ID,
        rmd_payload: b"rmd".to_vec(),
    }
}

pub fn source(partition: u32, offset: i64) -> SourceRecordInfo {
    SourceRecordInfo {
        topic: format!("{}_rt", STORE),
        partition,
        offset,
        producer_timestamp_ms: 0,
        from_real_time: true,
    }
}

pub fn consumed_put(partition: u32, key: &[u8], value: &[u8], timestamp: i64, offset: i64) -> ConsumedRecord {
    ConsumedRecord {
        topic: format!("{}_rt", STORE),
        partition,
        offset,
        source_region_id: 0,
        key: key.to_vec(),
        operation: ConsumedOperation::Put {
            value: value.to_vec(),
            schema_id: 7,
        },
        logical_timestamp: timestamp,
        producer_timestamp_ms: 0,
        from_real_time: true,
    }
}

pub fn consumed_delete(partition: u32, key: &[u8], timestamp: i64, offset: i64) -> ConsumedRecord {
    ConsumedRecord {
        operation: ConsumedOperation::Delete,
        ..consumed_put(partition, key, b"", timestamp, offset)
    }
}
