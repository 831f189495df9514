//! Recording collaborators.
//!
//! `RecordingQueue` stands in for the persistence queue: it records every
//! record the completion pipeline hands over and resolves its persisted
//! future immediately. `GatedStorage` blocks writes until permits are added.

use replica_write_path::buffer::PersistenceQueue;
use replica_write_path::partition::PartitionConsumptionState;
use replica_write_path::record::{ProducedRecordContext, WritePayload};
use replica_write_path::storage::{BoxFuture, InMemoryStorageEngine, StorageEngineRef, StoredRecord};
use replica_write_path::WritePathError;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// One record as it reached the persistence queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueuedRecord {
    pub partition: u32,
    pub key: Vec<u8>,
    pub payload: WritePayload,
    pub produced_offset: i64,
    pub consumed_offset: i64,
}

impl EnqueuedRecord {
    pub fn is_put(&self) -> bool {
        matches!(self.payload, WritePayload::Put(_))
    }

    pub fn is_delete(&self) -> bool {
        self.payload.is_delete()
    }

    pub fn schema_id(&self) -> i32 {
        match &self.payload {
            WritePayload::Put(put) => put.schema_id,
            WritePayload::Delete(delete) => delete.schema_id,
        }
    }
}

/// Persistence queue that records instead of applying.
#[derive(Default)]
pub struct RecordingQueue {
    records: Mutex<Vec<EnqueuedRecord>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EnqueuedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn records_for(&self, partition: u32) -> Vec<EnqueuedRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.partition == partition)
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

impl PersistenceQueue for RecordingQueue {
    fn enqueue(
        &self,
        partition_state: Arc<PartitionConsumptionState>,
        context: ProducedRecordContext,
    ) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.records.lock().unwrap().push(EnqueuedRecord {
                partition: partition_state.partition(),
                key: context.key.clone(),
                payload: context.payload.clone(),
                produced_offset: context.produced_offset,
                consumed_offset: context.consumed_offset,
            });
            context.complete(Ok(()));
            Ok(())
        })
    }
}

/// Storage engine whose puts wait for a permit.
pub struct GatedStorage {
    pub inner: InMemoryStorageEngine,
    pub gate: Semaphore,
}

impl GatedStorage {
    pub fn closed() -> Self {
        Self {
            inner: InMemoryStorageEngine::new(),
            gate: Semaphore::new(0),
        }
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }
}

impl StorageEngineRef for GatedStorage {
    fn put(&self, partition: u32, key: Vec<u8>, record: StoredRecord) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _permit = self.gate.acquire().await.map_err(|_| WritePathError::Shutdown)?;
            self.inner.put(partition, key, record).await
        })
    }

    fn remove(&self, partition: u32, key: Vec<u8>) -> BoxFuture<'_, ()> {
        self.inner.remove(partition, key)
    }

    fn get(&self, partition: u32, key: &[u8]) -> BoxFuture<'_, Option<StoredRecord>> {
        self.inner.get(partition, key)
    }
}
