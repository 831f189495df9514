// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Produced record context: the unit of work handed to the persistence queue.
//!
//! A context is created once conflict resolution has produced a winner. It
//! is owned by the completion pipeline until the output log acknowledges
//! it, then moved into the persistence queue, which owns it until the
//! storage engine has applied it.
//!
//! ```text
//! resolve ──► ProducedRecordContext ──ack──► offset stamped ──enqueue──► drainer
//!                    │                                                     │
//!                    └──── PersistedFuture (held by caller) ◄── signal ────┘
//! ```
//!
//! The persisted signal is single-assignment: it is a `oneshot` sender
//! consumed by [`ProducedRecordContext::complete`].

use crate::chunking::CHUNK_SCHEMA_ID;
use crate::error::{Result, WritePathError};
use tokio::sync::oneshot;

/// Produced offset used for chunk records.
///
/// Chunks are not independently addressable once their manifest commits,
/// so they never advance the partition's persisted offset.
pub const CHUNK_PRODUCED_OFFSET: i64 = -1;

/// Produced offset before the output log has acknowledged the record.
pub const UNASSIGNED_OFFSET: i64 = -1;

/// RMD version id of records that carry no replication metadata (chunks).
pub const NO_RMD_VERSION_ID: i32 = -1;

/// A put of a value with its replication metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutPayload {
    pub value: Vec<u8>,
    pub schema_id: i32,
    pub rmd_version_id: i32,
    /// Encoded replication metadata, or an encoded RMD manifest when the
    /// metadata itself was chunked. Empty for chunk records.
    pub rmd_payload: Vec<u8>,
}

/// A delete, carrying the metadata of the winning delete (may be empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePayload {
    pub schema_id: i32,
    pub rmd_version_id: i32,
    pub rmd_payload: Vec<u8>,
}

/// What the persistence queue applies for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePayload {
    Put(PutPayload),
    Delete(DeletePayload),
}

impl PutPayload {
    /// Payload of a single value chunk.
    pub fn chunk(bytes: Vec<u8>) -> Self {
        Self {
            value: bytes,
            schema_id: CHUNK_SCHEMA_ID,
            rmd_version_id: NO_RMD_VERSION_ID,
            rmd_payload: Vec::new(),
        }
    }
}

impl DeletePayload {
    /// Payload deleting a single chunk.
    pub fn chunk() -> Self {
        Self {
            schema_id: CHUNK_SCHEMA_ID,
            rmd_version_id: NO_RMD_VERSION_ID,
            rmd_payload: Vec::new(),
        }
    }
}

impl WritePayload {
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete(_))
    }

    /// Bytes accounted for production metrics.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Put(put) => put.value.len() + put.rmd_payload.len(),
            Self::Delete(delete) => delete.rmd_payload.len(),
        }
    }
}

/// Write half of a record's persisted future.
#[derive(Debug)]
pub struct PersistedSignal(oneshot::Sender<Result<()>>);

impl PersistedSignal {
    /// Create a linked signal/future pair.
    pub fn pair() -> (Self, PersistedFuture) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), PersistedFuture(rx))
    }

    /// Resolve the future. A caller that stopped waiting is not an error.
    pub fn complete(self, result: Result<()>) {
        let _ = self.0.send(result);
    }
}

/// Completion handle a caller may await until the record is applied.
#[derive(Debug)]
pub struct PersistedFuture(oneshot::Receiver<Result<()>>);

impl PersistedFuture {
    /// Wait for the storage engine to apply the record.
    pub async fn wait(self) -> Result<()> {
        match self.0.await {
            Ok(result) => result,
            Err(_) => Err(WritePathError::Internal(
                "record was dropped before being persisted".to_string(),
            )),
        }
    }
}

/// One record on its way from the completion pipeline to storage.
#[derive(Debug)]
pub struct ProducedRecordContext {
    /// Region the consumed record came from (`-1` for chunks).
    pub consumed_region_id: i32,
    /// Offset of the consumed record (`-1` for chunks).
    pub consumed_offset: i64,
    /// Key to write. For chunks this is the chunk key; otherwise the
    /// top-level key used for transient cache lookups.
    pub key: Vec<u8>,
    pub payload: WritePayload,
    /// Offset assigned by the output log on acknowledgement.
    pub produced_offset: i64,
    /// Wall-clock millis at acknowledgement, 0 until stamped.
    pub produced_timestamp_ms: i64,
    persisted: Option<PersistedSignal>,
}

impl ProducedRecordContext {
    fn new(
        consumed_region_id: i32,
        consumed_offset: i64,
        key: Vec<u8>,
        payload: WritePayload,
        persisted: Option<PersistedSignal>,
    ) -> Self {
        Self {
            consumed_region_id,
            consumed_offset,
            key,
            payload,
            produced_offset: UNASSIGNED_OFFSET,
            produced_timestamp_ms: 0,
            persisted,
        }
    }

    /// A put whose persistence the caller wants to await.
    pub fn new_put_with_future(
        consumed_region_id: i32,
        consumed_offset: i64,
        key: Vec<u8>,
        put: PutPayload,
    ) -> (Self, PersistedFuture) {
        let (signal, future) = PersistedSignal::pair();
        let ctx = Self::new(
            consumed_region_id,
            consumed_offset,
            key,
            WritePayload::Put(put),
            Some(signal),
        );
        (ctx, future)
    }

    /// A delete whose persistence the caller wants to await.
    pub fn new_delete_with_future(
        consumed_region_id: i32,
        consumed_offset: i64,
        key: Vec<u8>,
        delete: DeletePayload,
    ) -> (Self, PersistedFuture) {
        let (signal, future) = PersistedSignal::pair();
        let ctx = Self::new(
            consumed_region_id,
            consumed_offset,
            key,
            WritePayload::Delete(delete),
            Some(signal),
        );
        (ctx, future)
    }

    /// A put completing an existing signal (used for chunk manifests, which
    /// take over the signal of the record they replace).
    pub fn new_put_with_signal(
        consumed_region_id: i32,
        consumed_offset: i64,
        key: Vec<u8>,
        put: PutPayload,
        signal: Option<PersistedSignal>,
    ) -> Self {
        Self::new(consumed_region_id, consumed_offset, key, WritePayload::Put(put), signal)
    }

    /// A chunk put. Nobody awaits individual chunks.
    pub fn new_chunk_put(chunk_key: Vec<u8>, chunk: Vec<u8>) -> Self {
        let mut ctx = Self::new(-1, -1, chunk_key, WritePayload::Put(PutPayload::chunk(chunk)), None);
        ctx.produced_offset = CHUNK_PRODUCED_OFFSET;
        ctx
    }

    /// Deletion of a superseded chunk.
    pub fn new_chunk_delete(chunk_key: Vec<u8>) -> Self {
        let mut ctx = Self::new(-1, -1, chunk_key, WritePayload::Delete(DeletePayload::chunk()), None);
        ctx.produced_offset = CHUNK_PRODUCED_OFFSET;
        ctx
    }

    pub fn set_produced_offset(&mut self, offset: i64) {
        self.produced_offset = offset;
    }

    pub fn set_produced_timestamp_ms(&mut self, timestamp_ms: i64) {
        self.produced_timestamp_ms = timestamp_ms;
    }

    /// Whether this record is a chunk (or chunk deletion).
    pub fn is_chunk(&self) -> bool {
        self.consumed_offset < 0 && self.produced_offset == CHUNK_PRODUCED_OFFSET
    }

    /// Attach a signal detached from another context.
    pub fn set_persisted_signal(&mut self, signal: Option<PersistedSignal>) {
        self.persisted = signal;
    }

    pub fn has_persisted_signal(&self) -> bool {
        self.persisted.is_some()
    }

    /// Detach the persisted signal, e.g. to hand it to a manifest record.
    pub fn take_persisted_signal(&mut self) -> Option<PersistedSignal> {
        self.persisted.take()
    }

    /// Resolve the persisted future, if any. Consumes the context.
    pub fn complete(mut self, result: Result<()>) {
        if let Some(signal) = self.persisted.take() {
            signal.complete(result);
        }
    }
}

/// Current wall-clock time in epoch millis.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
