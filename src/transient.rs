//! Per-partition cache of in-flight records.
//!
//! Between production and durable application, the latest resolved value
//! for a key lives here so the next conflict resolution for that key sees
//! it instead of the stale stored value. Entries are evicted by the drainer
//! once the record that created them has been applied.

use crate::chunking::ChunkedValueManifest;
use dashmap::DashMap;

/// Latest in-flight state for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientRecord {
    /// `None` if the winning write was a delete.
    pub value: Option<Vec<u8>>,
    pub value_schema_id: i32,
    /// Encoded replication metadata of the winning write.
    pub rmd_payload: Vec<u8>,
    /// Offset of the consumed record that produced this state.
    pub consumed_offset: i64,
    pub value_manifest: Option<ChunkedValueManifest>,
    pub rmd_manifest: Option<ChunkedValueManifest>,
}

impl TransientRecord {
    pub fn new(value: Option<Vec<u8>>, value_schema_id: i32, rmd_payload: Vec<u8>, consumed_offset: i64) -> Self {
        Self {
            value,
            value_schema_id,
            rmd_payload,
            consumed_offset,
            value_manifest: None,
            rmd_manifest: None,
        }
    }
}

/// Concurrent map from top-level key to [`TransientRecord`].
#[derive(Debug, Default)]
pub struct TransientRecordCache {
    records: DashMap<Vec<u8>, TransientRecord>,
}

impl TransientRecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<TransientRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Insert or replace the entry for `key`.
    pub fn put(&self, key: Vec<u8>, record: TransientRecord) {
        self.records.insert(key, record);
    }

    /// Attach the manifests of the write in flight. Returns `false` if the
    /// key has no entry (evicted, or caching disabled).
    pub fn update_manifests(
        &self,
        key: &[u8],
        value_manifest: Option<ChunkedValueManifest>,
        rmd_manifest: Option<ChunkedValueManifest>,
    ) -> bool {
        match self.records.get_mut(key) {
            Some(mut entry) => {
                entry.value_manifest = value_manifest;
                entry.rmd_manifest = rmd_manifest;
                true
            }
            None => false,
        }
    }

    /// Evict `key` if its entry was produced by `consumed_offset`.
    ///
    /// A newer write for the same key keeps its entry.
    pub fn remove_if_offset(&self, key: &[u8], consumed_offset: i64) -> bool {
        self.records
            .remove_if(key, |_, record| record.consumed_offset == consumed_offset)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
