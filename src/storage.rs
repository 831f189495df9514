// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage engine integration traits.
//!
//! Defines the interface the persistence drainers apply records to, plus an
//! in-memory engine used by tests and local runs.
//!
//! Values and replication metadata are stored side by side under the same
//! key. A record with `value == None` is a tombstone: the key was deleted but
//! its metadata is kept so later conflict resolution can still see the
//! delete's timestamp.
//!
//! # Example
//!
//! ```rust,no_run
//! use replica_write_path::storage::{BoxFuture, StorageEngineRef, StoredRecord};
//!
//! struct MyEngine;
//!
//! impl StorageEngineRef for MyEngine {
//!     fn put(&self, _partition: u32, _key: Vec<u8>, _record: StoredRecord) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn remove(&self, _partition: u32, _key: Vec<u8>) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn get(&self, _partition: u32, _key: &[u8]) -> BoxFuture<'_, Option<StoredRecord>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//! }
//! ```

use crate::error::{Result, WritePathError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A value plus its replication metadata as held by the storage engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Schema id of the value (or of the manifest / chunk encodings).
    pub schema_id: i32,
    /// `None` for a tombstone.
    pub value: Option<Vec<u8>>,
    pub rmd_version_id: i32,
    /// Encoded replication metadata, empty if the record has none.
    pub rmd_payload: Vec<u8>,
}

impl StoredRecord {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Trait defining what the write path needs from the storage engine.
///
/// Implementations must be safe to call from several drainers at once;
/// ordering within a partition is guaranteed by the caller.
pub trait StorageEngineRef: Send + Sync + 'static {
    /// Insert or overwrite a record.
    fn put(&self, partition: u32, key: Vec<u8>, record: StoredRecord) -> BoxFuture<'_, ()>;

    /// Remove a key entirely (no tombstone).
    fn remove(&self, partition: u32, key: Vec<u8>) -> BoxFuture<'_, ()>;

    /// Read a record.
    fn get(&self, partition: u32, key: &[u8]) -> BoxFuture<'_, Option<StoredRecord>>;
}

/// In-memory storage engine.
#[derive(Debug, Default)]
pub struct InMemoryStorageEngine {
    records: RwLock<HashMap<(u32, Vec<u8>), StoredRecord>>,
    fail_next_writes: AtomicUsize,
}

impl InMemoryStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes (put or remove) fail with a storage error.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next_writes.store(n, Ordering::SeqCst);
    }

    /// Number of keys stored across all partitions, tombstones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// All keys stored for a partition, sorted.
    pub async fn keys(&self, partition: u32) -> Vec<Vec<u8>> {
        let mut keys: Vec<_> = self
            .records
            .read()
            .await
            .keys()
            .filter(|(p, _)| *p == partition)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn take_injected_failure(&self) -> Result<()> {
        let consumed = self
            .fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(WritePathError::Storage("injected write failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

impl StorageEngineRef for InMemoryStorageEngine {
    fn put(&self, partition: u32, key: Vec<u8>, record: StoredRecord) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.take_injected_failure()?;
            self.records.write().await.insert((partition, key), record);
            Ok(())
        })
    }

    fn remove(&self, partition: u32, key: Vec<u8>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.take_injected_failure()?;
            self.records.write().await.remove(&(partition, key));
            Ok(())
        })
    }

    fn get(&self, partition: u32, key: &[u8]) -> BoxFuture<'_, Option<StoredRecord>> {
        let lookup = (partition, key.to_vec());
        Box::pin(async move { Ok(self.records.read().await.get(&lookup).cloned()) })
    }
}
