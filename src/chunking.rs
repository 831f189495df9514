// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chunk and manifest model.
//!
//! Values larger than the chunk threshold are split into chunks stored under
//! their own keys, plus a manifest stored under the original key:
//!
//! ```text
//! key                                      → manifest (schema = CHUNKED_VALUE_MANIFEST_SCHEMA_ID)
//! key ‖ guid(16) ‖ seq(u64 BE) ‖ 0(u32 BE) → chunk 0 (schema = CHUNK_SCHEMA_ID)
//! key ‖ guid(16) ‖ seq(u64 BE) ‖ 1(u32 BE) → chunk 1
//! ...
//! ```
//!
//! The manifest is the commit marker: chunks are always applied before it,
//! so a reader that finds a manifest finds all of its chunks.
//!
//! The producer guid is random per writer and the write sequence is unique
//! within one writer, so every chunked write uses fresh chunk keys, even
//! across leader restarts and failovers.

use crate::error::{Result, WritePathError};
use crate::storage::{StorageEngineRef, StoredRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Schema id tagging an individual chunk record.
pub const CHUNK_SCHEMA_ID: i32 = -10;

/// Schema id tagging a chunked value manifest (and, as RMD version id, a
/// chunked RMD manifest).
pub const CHUNKED_VALUE_MANIFEST_SCHEMA_ID: i32 = -20;

/// Length of the suffix appended to a key to form a chunk key.
pub const CHUNK_KEY_SUFFIX_LEN: usize = 28;

/// Build the key of chunk `index` for write `sequence` of producer `guid`.
pub fn chunk_key(key: &[u8], guid: &Uuid, sequence: u64, index: u32) -> Vec<u8> {
    let mut chunk_key = Vec::with_capacity(key.len() + CHUNK_KEY_SUFFIX_LEN);
    chunk_key.extend_from_slice(key);
    chunk_key.extend_from_slice(guid.as_bytes());
    chunk_key.extend_from_slice(&sequence.to_be_bytes());
    chunk_key.extend_from_slice(&index.to_be_bytes());
    chunk_key
}

/// Split `value` into pieces of at most `max_chunk_size` bytes.
///
/// An empty value yields no chunks. `max_chunk_size` of 0 is treated as 1.
pub fn split_into_chunks(value: &[u8], max_chunk_size: usize) -> Vec<Vec<u8>> {
    value
        .chunks(max_chunk_size.max(1))
        .map(<[u8]>::to_vec)
        .collect()
}

/// Ordered chunk keys plus what is needed to reassemble the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkedValueManifest {
    #[serde(with = "hex_keys")]
    pub keys_with_chunk_id_suffix: Vec<Vec<u8>>,
    /// Schema id of the reassembled value.
    pub schema_id: i32,
    /// Total size of the reassembled value in bytes.
    pub size: usize,
}

impl ChunkedValueManifest {
    pub fn chunk_count(&self) -> usize {
        self.keys_with_chunk_id_suffix.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod hex_keys {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(keys: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        keys.iter().map(hex::encode).collect::<Vec<_>>().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Result of the chunking stage for one produced record.
///
/// Built once by the writer and moved into the completion pipeline. The
/// chunk arrays must match their manifests; [`ChunkingInfo::validate`]
/// enforces it before anything is enqueued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkingInfo {
    /// Top-level (non-chunked) key.
    pub key: Vec<u8>,
    pub value_chunks: Option<Vec<Vec<u8>>>,
    pub value_manifest: Option<ChunkedValueManifest>,
    pub rmd_chunks: Option<Vec<Vec<u8>>>,
    pub rmd_manifest: Option<ChunkedValueManifest>,
    /// Manifest of the value this write supersedes.
    pub old_value_manifest: Option<ChunkedValueManifest>,
    /// Manifest of the RMD this write supersedes.
    pub old_rmd_manifest: Option<ChunkedValueManifest>,
}

impl ChunkingInfo {
    /// Nothing chunked and nothing to clean up.
    pub fn unchunked(key: Vec<u8>) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }

    pub fn is_value_chunked(&self) -> bool {
        self.value_manifest.is_some()
    }

    /// Check chunk arrays against their manifests.
    ///
    /// RMD is only ever chunked alongside a chunked value.
    pub fn validate(&self) -> Result<()> {
        if self.rmd_manifest.is_some() && self.value_manifest.is_none() {
            return Err(WritePathError::Consistency(
                "rmd manifest present without a value manifest".to_string(),
            ));
        }
        validate_pair("value", self.value_manifest.as_ref(), self.value_chunks.as_deref())?;
        validate_pair("rmd", self.rmd_manifest.as_ref(), self.rmd_chunks.as_deref())
    }

    /// Chunk keys of the superseded manifests that the new manifests no
    /// longer reference, in manifest order. Only these may be deleted.
    pub fn orphaned_chunk_keys(&self) -> Vec<Vec<u8>> {
        let live: HashSet<&[u8]> = self
            .value_manifest
            .iter()
            .chain(&self.rmd_manifest)
            .flat_map(|m| m.keys_with_chunk_id_suffix.iter().map(Vec::as_slice))
            .collect();
        self.old_value_manifest
            .iter()
            .chain(&self.old_rmd_manifest)
            .flat_map(|m| m.keys_with_chunk_id_suffix.iter())
            .filter(|key| !live.contains(key.as_slice()))
            .cloned()
            .collect()
    }

    /// Number of chunk deletions superseded manifests require.
    pub fn superseded_chunk_count(&self) -> usize {
        self.orphaned_chunk_keys().len()
    }
}

fn validate_pair(kind: &str, manifest: Option<&ChunkedValueManifest>, chunks: Option<&[Vec<u8>]>) -> Result<()> {
    let Some(manifest) = manifest else {
        return Ok(());
    };
    match chunks {
        None => Err(WritePathError::Consistency(format!(
            "{} manifest has {} chunk keys but no chunk payloads",
            kind,
            manifest.chunk_count()
        ))),
        Some(chunks) if chunks.len() != manifest.chunk_count() => Err(WritePathError::Consistency(format!(
            "{} manifest has {} chunk keys but {} chunk payloads",
            kind,
            manifest.chunk_count(),
            chunks.len()
        ))),
        Some(_) => Ok(()),
    }
}

/// A stored record with chunked parts reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledRecord {
    /// Schema id of the value (the original schema for chunked values).
    pub schema_id: i32,
    /// `None` for a tombstone.
    pub value: Option<Vec<u8>>,
    /// Encoded replication metadata, reassembled if it was chunked.
    pub rmd_payload: Vec<u8>,
    pub value_manifest: Option<ChunkedValueManifest>,
    pub rmd_manifest: Option<ChunkedValueManifest>,
}

/// Read the record stored under `key`, reassembling chunked value and RMD.
pub async fn assemble_record<S: StorageEngineRef + ?Sized>(
    storage: &S,
    partition: u32,
    key: &[u8],
) -> Result<Option<AssembledRecord>> {
    let Some(stored) = storage.get(partition, key).await? else {
        return Ok(None);
    };
    let StoredRecord {
        schema_id,
        value,
        rmd_version_id,
        rmd_payload,
    } = stored;

    let (schema_id, value, value_manifest) = match value {
        Some(bytes) if schema_id == CHUNKED_VALUE_MANIFEST_SCHEMA_ID => {
            let manifest = ChunkedValueManifest::decode(&bytes)?;
            let assembled = fetch_chunks(storage, partition, &manifest).await?;
            (manifest.schema_id, Some(assembled), Some(manifest))
        }
        other => (schema_id, other, None),
    };

    let (rmd_payload, rmd_manifest) = if rmd_version_id == CHUNKED_VALUE_MANIFEST_SCHEMA_ID {
        let manifest = ChunkedValueManifest::decode(&rmd_payload)?;
        let assembled = fetch_chunks(storage, partition, &manifest).await?;
        (assembled, Some(manifest))
    } else {
        (rmd_payload, None)
    };

    Ok(Some(AssembledRecord {
        schema_id,
        value,
        rmd_payload,
        value_manifest,
        rmd_manifest,
    }))
}

/// Reassemble only the value stored under `key`.
pub async fn assemble_value<S: StorageEngineRef + ?Sized>(
    storage: &S,
    partition: u32,
    key: &[u8],
) -> Result<Option<Vec<u8>>> {
    Ok(assemble_record(storage, partition, key)
        .await?
        .and_then(|record| record.value))
}

async fn fetch_chunks<S: StorageEngineRef + ?Sized>(
    storage: &S,
    partition: u32,
    manifest: &ChunkedValueManifest,
) -> Result<Vec<u8>> {
    let mut assembled = Vec::with_capacity(manifest.size);
    for (index, chunk_key) in manifest.keys_with_chunk_id_suffix.iter().enumerate() {
        let chunk = storage
            .get(partition, chunk_key)
            .await?
            .and_then(|record| record.value)
            .ok_or_else(|| {
                WritePathError::Consistency(format!(
                    "chunk {} of {} missing (key {})",
                    index,
                    manifest.chunk_count(),
                    hex::encode(chunk_key)
                ))
            })?;
        assembled.extend_from_slice(&chunk);
    }
    if assembled.len() != manifest.size {
        return Err(WritePathError::Consistency(format!(
            "reassembled {} bytes, manifest expects {}",
            assembled.len(),
            manifest.size
        )));
    }
    Ok(assembled)
}
