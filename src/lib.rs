//! # Replica Write Path
//!
//! Leader-side write path for active-active replicated partitions.
//!
//! ## Architecture
//!
//! A leader replica consumes records from source regions, resolves them
//! against the current state of each key, produces the winners to the
//! version topic and, once the log acknowledges them, hands them to the
//! persistence queue that applies them to local storage:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                           replica-write-path                              │
//! │                                                                           │
//! │  ┌──────────────────┐   ┌────────────────┐   ┌────────────────────────┐   │
//! │  │ LeaderWritePath  │──►│ ChunkingWriter │──►│ OutputLog (version     │   │
//! │  │ (DCR + transient)│   │ (chunks, mfst) │   │ topic, per-partition   │   │
//! │  └──────────────────┘   └────────────────┘   │ ordered acks)          │   │
//! │          ▲                                   └───────────┬────────────┘   │
//! │          │ read state                                    │ ack            │
//! │          │                                               ▼                │
//! │  ┌───────┴──────────┐   ┌────────────────────┐   ┌─────────────────────┐  │
//! │  │ StorageEngineRef │◄──│ StoreBufferService │◄──│ LeaderProducer-     │  │
//! │  │                  │   │ (bounded drainers) │   │ Callback            │  │
//! │  └──────────────────┘   └────────────────────┘   └─────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Chunked Values
//!
//! Oversized values are written as chunks plus a manifest under the original
//! key. Chunks are always applied before their manifest, and chunks of a
//! superseded manifest are deleted after the replacing record. See
//! [`chunking`] and [`callback`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replica_write_path::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = WritePathConfig::for_testing("store", 1);
//!     config.validate()?;
//!
//!     let storage = Arc::new(InMemoryStorageEngine::new());
//!     let buffer = Arc::new(StoreBufferService::start(&config.persistence, storage.clone())?);
//!     let ctx = Arc::new(LeaderContext {
//!         store: config.store.clone(),
//!         ingestion_task: Arc::new(LocalIngestionTask::new("store", 1)),
//!         persistence: buffer.clone(),
//!         stats: Arc::new(IngestionStats::new()),
//!         log_filter: RedundantLogFilter::global(),
//!     });
//!     let log: Arc<dyn OutputLog> = Arc::new(InMemoryOutputLog::new(config.store.version_topic()));
//!     let leader = LeaderWritePath::new(ctx, ChunkingWriter::new(log, config.chunking.clone()), storage);
//!
//!     let partition = Arc::new(PartitionConsumptionState::new(config.store.version_topic(), 0, true));
//!     let record = ConsumedRecord {
//!         topic: "store_rt".to_string(),
//!         partition: 0,
//!         offset: 0,
//!         source_region_id: 0,
//!         key: b"key".to_vec(),
//!         operation: ConsumedOperation::Put { value: b"value".to_vec(), schema_id: 1 },
//!         logical_timestamp: 1,
//!         producer_timestamp_ms: 0,
//!         from_real_time: true,
//!     };
//!     if let WriteOutcome::Produced(persisted) = leader.process(&partition, record).await? {
//!         persisted.wait().await?;
//!     }
//!
//!     buffer.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod callback;
pub mod chunking;
pub mod config;
pub mod error;
pub mod leader;
pub mod log_filter;
pub mod merge;
pub mod metrics;
pub mod offline;
pub mod output_log;
pub mod partition;
pub mod record;
pub mod rmd;
pub mod stats;
pub mod storage;
pub mod transient;
pub mod writer;

// Re-exports for convenience
pub use buffer::{PersistenceQueue, StoreBufferService};
pub use callback::{LeaderContext, LeaderProducerCallback, SourceRecordInfo};
pub use chunking::{assemble_value, ChunkedValueManifest, ChunkingInfo};
pub use config::{ChunkingConfig, PersistenceConfig, StoreConfig, WritePathConfig};
pub use error::{Result, WritePathError};
pub use leader::{ConsumedOperation, ConsumedRecord, LeaderWritePath, WriteOutcome};
pub use log_filter::RedundantLogFilter;
pub use merge::{compare_and_return, merge_offset_vector, sum_offset_vector, TieBreaker};
pub use offline::{OfflineInstanceTracker, OfflineLimits, OfflineStatus};
pub use output_log::{InMemoryOutputLog, OutputLog};
pub use partition::{IngestionTaskRef, LocalIngestionTask, PartitionConsumptionState};
pub use record::{PersistedFuture, ProducedRecordContext};
pub use rmd::{ReplicationMetadata, TimestampMetadata};
pub use stats::IngestionStats;
pub use storage::{InMemoryStorageEngine, StorageEngineRef};
pub use writer::ChunkingWriter;
