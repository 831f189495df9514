// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chunking writer in front of the output log.
//!
//! Records whose key plus value exceed the chunk threshold are produced as a
//! series of chunk records followed by a manifest under the original key.
//! The manifest's acknowledgement drives the completion pipeline; chunk
//! acknowledgements only matter when they fail.
//!
//! ```text
//! put(key, big value)
//!   ├─► produce chunk 0 ─┐
//!   ├─► produce chunk 1 ─┼─ ChunkFailureCompletion (failures only)
//!   ├─► produce chunk n ─┘
//!   └─► produce manifest ── LeaderCompletion(ChunkingInfo) ─► callback.on_completion
//! ```
//!
//! Chunks and manifest go to the same partition, so the log acknowledges
//! them in this order.

use crate::callback::{ChunkFailureCompletion, LeaderCompletion, LeaderProducerCallback};
use crate::chunking::{
    chunk_key, split_into_chunks, ChunkedValueManifest, ChunkingInfo, CHUNKED_VALUE_MANIFEST_SCHEMA_ID,
};
use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::output_log::{LogRecord, OutputLog};
use crate::record::{now_ms, DeletePayload, PutPayload, WritePayload};
use crate::rmd::RMD_VERSION_ID;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Splits oversized values and produces records with their callbacks.
pub struct ChunkingWriter<L: OutputLog + ?Sized> {
    log: Arc<L>,
    config: ChunkingConfig,
    producer_guid: Uuid,
    write_sequence: AtomicU64,
}

impl<L: OutputLog + ?Sized> ChunkingWriter<L> {
    /// Every writer gets a fresh producer guid, so chunk keys never collide
    /// with those of another writer, including an earlier leader of the
    /// same partition.
    pub fn new(log: Arc<L>, config: ChunkingConfig) -> Self {
        Self::with_sequence_start(log, config, now_ms().max(0) as u64)
    }

    pub fn with_sequence_start(log: Arc<L>, config: ChunkingConfig, sequence: u64) -> Self {
        Self::with_producer(log, config, Uuid::new_v4(), sequence)
    }

    pub fn with_producer(log: Arc<L>, config: ChunkingConfig, producer_guid: Uuid, sequence: u64) -> Self {
        Self {
            log,
            config,
            producer_guid,
            write_sequence: AtomicU64::new(sequence),
        }
    }

    pub fn producer_guid(&self) -> &Uuid {
        &self.producer_guid
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    fn exceeds_threshold(&self, key: &[u8], bytes: &[u8]) -> bool {
        key.len() + bytes.len() > self.config.max_chunk_size_bytes
    }

    /// Decide how a put is chunked. Consumes a write sequence number only
    /// when the value is chunked.
    pub fn prepare_put(
        &self,
        key: &[u8],
        put: &PutPayload,
        old_value_manifest: Option<ChunkedValueManifest>,
        old_rmd_manifest: Option<ChunkedValueManifest>,
    ) -> ChunkingInfo {
        let mut info = ChunkingInfo {
            key: key.to_vec(),
            old_value_manifest,
            old_rmd_manifest,
            ..ChunkingInfo::default()
        };
        if !self.config.enabled || !self.exceeds_threshold(key, &put.value) {
            return info;
        }

        let sequence = self.write_sequence.fetch_add(1, Ordering::Relaxed);
        let value_chunks = split_into_chunks(&put.value, self.config.max_chunk_size_bytes);
        let value_keys: Vec<_> = (0..value_chunks.len() as u32)
            .map(|index| chunk_key(key, &self.producer_guid, sequence, index))
            .collect();
        info.value_manifest = Some(ChunkedValueManifest {
            keys_with_chunk_id_suffix: value_keys,
            schema_id: put.schema_id,
            size: put.value.len(),
        });

        if self.config.rmd_chunking_enabled && self.exceeds_threshold(key, &put.rmd_payload) {
            let rmd_chunks = split_into_chunks(&put.rmd_payload, self.config.max_chunk_size_bytes);
            let first = value_chunks.len() as u32;
            let rmd_keys = (first..first + rmd_chunks.len() as u32)
                .map(|index| chunk_key(key, &self.producer_guid, sequence, index))
                .collect();
            info.rmd_manifest = Some(ChunkedValueManifest {
                keys_with_chunk_id_suffix: rmd_keys,
                schema_id: RMD_VERSION_ID,
                size: put.rmd_payload.len(),
            });
            info.rmd_chunks = Some(rmd_chunks);
        }
        info.value_chunks = Some(value_chunks);
        info
    }

    /// Deletes are never chunked; they only carry the manifests to clean up.
    pub fn prepare_delete(
        &self,
        key: &[u8],
        old_value_manifest: Option<ChunkedValueManifest>,
        old_rmd_manifest: Option<ChunkedValueManifest>,
    ) -> ChunkingInfo {
        ChunkingInfo {
            key: key.to_vec(),
            old_value_manifest,
            old_rmd_manifest,
            ..ChunkingInfo::default()
        }
    }

    /// Produce a put, chunked if needed.
    pub fn put(
        &self,
        partition: u32,
        key: &[u8],
        put: PutPayload,
        old_value_manifest: Option<ChunkedValueManifest>,
        old_rmd_manifest: Option<ChunkedValueManifest>,
        callback: Arc<LeaderProducerCallback>,
    ) -> Result<()> {
        let info = self.prepare_put(key, &put, old_value_manifest, old_rmd_manifest);
        callback.on_chunking_info(&info);

        let record = match (&info.value_manifest, &info.value_chunks) {
            (Some(value_manifest), Some(value_chunks)) => {
                self.produce_chunks(partition, value_manifest, value_chunks, &callback)?;
                let rmd = match (&info.rmd_manifest, &info.rmd_chunks) {
                    (Some(rmd_manifest), Some(rmd_chunks)) => {
                        self.produce_chunks(partition, rmd_manifest, rmd_chunks, &callback)?;
                        (CHUNKED_VALUE_MANIFEST_SCHEMA_ID, rmd_manifest.encode()?)
                    }
                    _ => (put.rmd_version_id, put.rmd_payload),
                };
                debug!(
                    partition,
                    key = %hex::encode(key),
                    chunks = value_manifest.chunk_count(),
                    size = value_manifest.size,
                    "Producing chunked value"
                );
                LogRecord {
                    key: key.to_vec(),
                    payload: WritePayload::Put(PutPayload {
                        value: value_manifest.encode()?,
                        schema_id: CHUNKED_VALUE_MANIFEST_SCHEMA_ID,
                        rmd_version_id: rmd.0,
                        rmd_payload: rmd.1,
                    }),
                }
            }
            _ => LogRecord {
                key: key.to_vec(),
                payload: WritePayload::Put(put),
            },
        };

        self.log
            .produce(partition, record, Some(Box::new(LeaderCompletion::new(callback, info))))
    }

    /// Produce a delete.
    pub fn delete(
        &self,
        partition: u32,
        key: &[u8],
        delete: DeletePayload,
        old_value_manifest: Option<ChunkedValueManifest>,
        old_rmd_manifest: Option<ChunkedValueManifest>,
        callback: Arc<LeaderProducerCallback>,
    ) -> Result<()> {
        let info = self.prepare_delete(key, old_value_manifest, old_rmd_manifest);
        let record = LogRecord {
            key: key.to_vec(),
            payload: WritePayload::Delete(delete),
        };
        self.log
            .produce(partition, record, Some(Box::new(LeaderCompletion::new(callback, info))))
    }

    fn produce_chunks(
        &self,
        partition: u32,
        manifest: &ChunkedValueManifest,
        chunks: &[Vec<u8>],
        callback: &Arc<LeaderProducerCallback>,
    ) -> Result<()> {
        for (chunk_key, chunk) in manifest.keys_with_chunk_id_suffix.iter().zip(chunks) {
            let record = LogRecord {
                key: chunk_key.clone(),
                payload: WritePayload::Put(PutPayload::chunk(chunk.clone())),
            };
            self.log.produce(
                partition,
                record,
                Some(Box::new(ChunkFailureCompletion::new(Arc::clone(callback)))),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_log::InMemoryOutputLog;

    fn writer() -> ChunkingWriter<InMemoryOutputLog> {
        ChunkingWriter::with_sequence_start(
            Arc::new(InMemoryOutputLog::new("store_v1")),
            ChunkingConfig::for_testing(),
            100,
        )
    }

    fn put(value: &[u8], rmd: &[u8]) -> PutPayload {
        PutPayload {
            value: value.to_vec(),
            schema_id: 3,
            rmd_version_id: RMD_VERSION_ID,
            rmd_payload: rmd.to_vec(),
        }
    }

    #[test]
    fn test_small_value_is_not_chunked() {
        let writer = writer();
        let info = writer.prepare_put(b"key", &put(b"small", b"rmd"), None, None);
        assert_eq!(info, ChunkingInfo::unchunked(b"key".to_vec()));
        // No sequence consumed.
        let next = writer.prepare_put(b"key", &put(&[1; 40], b""), None, None);
        assert_eq!(
            next.value_manifest.unwrap().keys_with_chunk_id_suffix[0],
            chunk_key(b"key", writer.producer_guid(), 100, 0)
        );
    }

    #[test]
    fn test_threshold_counts_key_and_value() {
        let writer = writer();
        // 3 + 13 = 16 is at the threshold, 3 + 14 exceeds it.
        assert!(writer.prepare_put(b"key", &put(&[0; 13], b""), None, None).value_manifest.is_none());
        assert!(writer.prepare_put(b"key", &put(&[0; 14], b""), None, None).value_manifest.is_some());
    }

    #[test]
    fn test_large_value_is_chunked() {
        let writer = writer();
        let value: Vec<u8> = (0..40).collect();
        let info = writer.prepare_put(b"key", &put(&value, b"r"), None, None);

        let manifest = info.value_manifest.clone().unwrap();
        assert_eq!(manifest.chunk_count(), 3);
        assert_eq!(manifest.size, 40);
        assert_eq!(manifest.schema_id, 3);
        assert_eq!(info.value_chunks.clone().unwrap().concat(), value);
        assert!(info.rmd_manifest.is_none());
        info.validate().unwrap();
    }

    #[test]
    fn test_large_rmd_indices_follow_value_chunks() {
        let writer = writer();
        let info = writer.prepare_put(b"key", &put(&[0; 40], &[9; 20]), None, None);

        let rmd_manifest = info.rmd_manifest.clone().unwrap();
        assert_eq!(rmd_manifest.schema_id, RMD_VERSION_ID);
        assert_eq!(
            rmd_manifest.keys_with_chunk_id_suffix,
            vec![
                chunk_key(b"key", writer.producer_guid(), 100, 3),
                chunk_key(b"key", writer.producer_guid(), 100, 4),
            ]
        );
        info.validate().unwrap();
    }

    #[test]
    fn test_chunking_disabled() {
        let writer = ChunkingWriter::new(
            Arc::new(InMemoryOutputLog::new("store_v1")),
            ChunkingConfig {
                enabled: false,
                ..ChunkingConfig::for_testing()
            },
        );
        let info = writer.prepare_put(b"key", &put(&[0; 100], b""), None, None);
        assert!(!info.is_value_chunked());
    }

    #[test]
    fn test_sequences_are_unique_per_chunked_write() {
        let writer = writer();
        let a = writer.prepare_put(b"key", &put(&[0; 40], b""), None, None);
        let b = writer.prepare_put(b"key", &put(&[0; 40], b""), None, None);
        let a_keys = a.value_manifest.unwrap().keys_with_chunk_id_suffix;
        let b_keys = b.value_manifest.unwrap().keys_with_chunk_id_suffix;
        assert!(a_keys.iter().all(|k| !b_keys.contains(k)));
    }

    #[test]
    fn test_writers_with_same_sequence_use_distinct_keys() {
        let first = writer();
        let second = writer();
        assert_ne!(first.producer_guid(), second.producer_guid());

        let a = first.prepare_put(b"key", &put(&[0; 40], b""), None, None);
        let b = second.prepare_put(b"key", &put(&[0; 40], b""), a.value_manifest.clone(), None);
        let a_keys = a.value_manifest.unwrap().keys_with_chunk_id_suffix;
        let b_keys = b.value_manifest.clone().unwrap().keys_with_chunk_id_suffix;
        assert!(a_keys.iter().all(|k| !b_keys.contains(k)));
        assert_eq!(b.orphaned_chunk_keys(), a_keys);
    }

    #[test]
    fn test_delete_carries_old_manifests() {
        let writer = writer();
        let old = writer.prepare_put(b"key", &put(&[0; 40], b""), None, None).value_manifest;
        let info = writer.prepare_delete(b"key", old.clone(), None);
        assert_eq!(info.old_value_manifest, old);
        assert!(info.value_manifest.is_none());
        assert_eq!(info.superseded_chunk_count(), 3);
    }
}
