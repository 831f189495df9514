// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistence queue: bounded per-drainer queues applying produced records
//! to the storage engine.
//!
//! # Architecture
//!
//! ```text
//! completion callbacks ──put_record()──┬─► drainer 0 [bounded mpsc] ─► storage
//!                                      ├─► drainer 1 [bounded mpsc] ─► storage
//!                                      └─► drainer N-1 ...
//! ```
//!
//! A partition always maps to drainer `partition % N`, so records of one
//! partition are applied in exactly the order they were enqueued. That is
//! what makes a chunk manifest a commit marker: its chunks were enqueued
//! first and are therefore applied first.
//!
//! # Backpressure
//!
//! Queues are bounded. When a drainer falls behind, `put_record()` waits
//! for capacity, which in turn stalls the output log's acknowledgement
//! task for that partition. Production slows down instead of buffering
//! without limit.
//!
//! # Cancellation
//!
//! A blocked `put_record()` races the partition's unsubscribe signal and
//! fails with [`WritePathError::Interrupted`] if the partition goes away.
//! Records already queued for an unsubscribed partition are dropped by the
//! drainer and their futures resolve with
//! [`WritePathError::PartitionUnsubscribed`].

use crate::config::PersistenceConfig;
use crate::error::{Result, WritePathError};
use crate::metrics;
use crate::partition::PartitionConsumptionState;
use crate::record::{ProducedRecordContext, WritePayload};
use crate::storage::{BoxFuture, StorageEngineRef, StoredRecord};
use futures::future::join_all;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Downstream queue the completion pipeline hands acknowledged records to.
///
/// Implementations must apply records of one partition in enqueue order and
/// resolve each record's persisted future once applied. `enqueue` may wait
/// when the queue is full.
pub trait PersistenceQueue: Send + Sync + 'static {
    fn enqueue(
        &self,
        partition_state: Arc<PartitionConsumptionState>,
        context: ProducedRecordContext,
    ) -> BoxFuture<'_, ()>;
}

/// A record waiting in a drainer queue.
struct QueuedRecord {
    partition_state: Arc<PartitionConsumptionState>,
    context: ProducedRecordContext,
    enqueued_at: Instant,
}

/// Bounded, partition-ordered persistence queue.
pub struct StoreBufferService {
    senders: RwLock<Option<Vec<mpsc::Sender<QueuedRecord>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    queue_capacity: usize,
}

impl StoreBufferService {
    /// Spawn the drainers. Must be called from within a tokio runtime.
    pub fn start(config: &PersistenceConfig, storage: Arc<dyn StorageEngineRef>) -> Result<Self> {
        if config.drainer_count == 0 || config.queue_capacity == 0 {
            return Err(WritePathError::Config(format!(
                "persistence needs at least one drainer and a non-zero queue (drainers={}, capacity={})",
                config.drainer_count, config.queue_capacity
            )));
        }

        let mut senders = Vec::with_capacity(config.drainer_count);
        let mut handles = Vec::with_capacity(config.drainer_count);
        for index in 0..config.drainer_count {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(run_drainer(index, rx, storage)));
            senders.push(tx);
        }

        info!(
            drainers = config.drainer_count,
            queue_capacity = config.queue_capacity,
            "Started store buffer service"
        );

        Ok(Self {
            senders: RwLock::new(Some(senders)),
            handles: Mutex::new(handles),
            queue_capacity: config.queue_capacity,
        })
    }

    fn drainer_for(&self, partition: u32) -> Result<(usize, mpsc::Sender<QueuedRecord>)> {
        let guard = self
            .senders
            .read()
            .map_err(|_| WritePathError::Internal("store buffer lock poisoned".to_string()))?;
        let senders = guard.as_ref().ok_or(WritePathError::Shutdown)?;
        let index = partition as usize % senders.len();
        Ok((index, senders[index].clone()))
    }

    /// Hand a record to the drainer owning its partition.
    ///
    /// Waits while the queue is full. On any error the record's persisted
    /// future is resolved with the same error.
    pub async fn put_record(
        &self,
        partition_state: Arc<PartitionConsumptionState>,
        context: ProducedRecordContext,
    ) -> Result<()> {
        let partition = partition_state.partition();
        if partition_state.is_unsubscribed() {
            context.complete(Err(WritePathError::PartitionUnsubscribed(partition)));
            return Err(WritePathError::PartitionUnsubscribed(partition));
        }

        let (index, sender) = match self.drainer_for(partition) {
            Ok(found) => found,
            Err(e) => {
                context.complete(Err(WritePathError::Shutdown));
                return Err(e);
            }
        };

        let permit = tokio::select! {
            biased;
            _ = partition_state.wait_unsubscribed() => {
                let err = || WritePathError::Interrupted(format!(
                    "enqueueing record for partition {} to drainer {}",
                    partition, index
                ));
                context.complete(Err(err()));
                return Err(err());
            }
            permit = sender.reserve() => permit,
        };

        let permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                context.complete(Err(WritePathError::Shutdown));
                return Err(WritePathError::Shutdown);
            }
        };

        permit.send(QueuedRecord {
            partition_state,
            context,
            enqueued_at: Instant::now(),
        });
        metrics::set_drainer_queue_depth(index, self.queue_capacity - sender.capacity());
        Ok(())
    }

    /// Records currently queued on the drainer owning `partition`.
    pub fn queue_depth(&self, partition: u32) -> usize {
        self.drainer_for(partition)
            .map(|(_, sender)| sender.max_capacity() - sender.capacity())
            .unwrap_or(0)
    }

    /// Stop accepting records, let drainers finish what is queued, and wait
    /// for them to exit.
    pub async fn shutdown(&self) {
        match self.senders.write() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Drainer task ended abnormally");
            }
        }
        info!("Store buffer service stopped");
    }
}

impl PersistenceQueue for StoreBufferService {
    fn enqueue(
        &self,
        partition_state: Arc<PartitionConsumptionState>,
        context: ProducedRecordContext,
    ) -> BoxFuture<'_, ()> {
        Box::pin(self.put_record(partition_state, context))
    }
}

async fn run_drainer(index: usize, mut rx: mpsc::Receiver<QueuedRecord>, storage: Arc<dyn StorageEngineRef>) {
    let span = info_span!("store_buffer_drainer", drainer = index);

    async move {
        debug!("Drainer started");
        while let Some(queued) = rx.recv().await {
            metrics::set_drainer_queue_depth(index, rx.len());
            drain_one(index, queued, storage.as_ref()).await;
        }
        debug!("Drainer stopped");
    }
    .instrument(span)
    .await
}

async fn drain_one(index: usize, queued: QueuedRecord, storage: &dyn StorageEngineRef) {
    let QueuedRecord {
        partition_state,
        mut context,
        enqueued_at,
    } = queued;
    let partition = partition_state.partition();

    if partition_state.is_unsubscribed() {
        metrics::record_drainer_dropped_unsubscribed(index);
        debug!(
            partition,
            consumed_offset = context.consumed_offset,
            "Dropping record for unsubscribed partition"
        );
        context.complete(Err(WritePathError::PartitionUnsubscribed(partition)));
        return;
    }

    let is_chunk = context.is_chunk();
    let signal = context.take_persisted_signal();
    let ProducedRecordContext {
        key,
        payload,
        produced_offset,
        consumed_offset,
        ..
    } = context;

    let result = apply(storage, partition, key.clone(), payload).await;
    metrics::record_drainer_apply(index, enqueued_at.elapsed(), result.is_ok());

    match &result {
        Ok(()) => {
            partition_state.record_persisted_offset(produced_offset);
            if !is_chunk {
                if let Some(cache) = partition_state.transient_cache() {
                    cache.remove_if_offset(&key, consumed_offset);
                }
            }
        }
        Err(e) => {
            error!(
                replica = %partition_state.replica_id(),
                produced_offset,
                consumed_offset,
                error = %e,
                "Failed to apply record to storage"
            );
        }
    }

    if let Some(signal) = signal {
        signal.complete(result);
    }
}

async fn apply(storage: &dyn StorageEngineRef, partition: u32, key: Vec<u8>, payload: WritePayload) -> Result<()> {
    match payload {
        WritePayload::Put(put) => {
            let record = StoredRecord {
                schema_id: put.schema_id,
                value: Some(put.value),
                rmd_version_id: put.rmd_version_id,
                rmd_payload: put.rmd_payload,
            };
            storage.put(partition, key, record).await
        }
        // Deletes with metadata leave a tombstone so later resolution still
        // sees the delete's timestamp.
        WritePayload::Delete(delete) if !delete.rmd_payload.is_empty() => {
            let record = StoredRecord {
                schema_id: delete.schema_id,
                value: None,
                rmd_version_id: delete.rmd_version_id,
                rmd_payload: delete.rmd_payload,
            };
            storage.put(partition, key, record).await
        }
        WritePayload::Delete(_) => storage.remove(partition, key).await,
    }
}
