// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the leader write path.
//!
//! Errors are categorized by how the completion pipeline must react to them,
//! not by where they came from.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Fatal | Description |
//! |------------|-----------|-------|-------------|
//! | `Transport` | Yes | No | Output log could not durably accept a record |
//! | `Storage` | Yes | No | Storage engine rejected an apply |
//! | `Consistency` | No | Yes | Chunk/manifest state is corrupt (chunking bug) |
//! | `Interrupted` | No | Yes | Cancelled while blocked on the persistence queue |
//! | `PartitionUnsubscribed` | No | No | Owning partition was torn down |
//! | `Serialization` | No | No | Manifest or metadata payload could not be (de)coded |
//! | `Config` | No | No | Configuration invalid |
//! | `Shutdown` | No | No | Queue or log is shutting down |
//! | `Internal` | No | No | Unexpected internal error |
//!
//! # Escalation
//!
//! Whether a failure fails the partition is decided by the completion
//! pipeline (see [`crate::callback`]) using the end-of-bulk-load flag, not
//! by the error itself. [`WritePathError::is_fatal()`] only marks errors that
//! must never be swallowed.

use thiserror::Error;

/// Result type alias for write path operations.
pub type Result<T> = std::result::Result<T, WritePathError>;

/// Errors that can occur on the leader write path.
///
/// `Clone` so one failure can be both escalated to the ingestion task and
/// delivered to the caller awaiting the record.
#[derive(Error, Debug, Clone)]
pub enum WritePathError {
    /// The output log refused or failed to acknowledge a record.
    #[error("Transport error ({topic_partition}): {message}")]
    Transport {
        topic_partition: String,
        message: String,
    },

    /// Chunk payloads and manifest disagree, or a chunk is missing.
    ///
    /// Never retried: it signals corruption of internal state.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// Blocking hand-off was cancelled by a partition unsubscribe.
    #[error("Interrupted while {0}")]
    Interrupted(String),

    /// The owning partition was unsubscribed before the record was applied.
    #[error("Partition {0} unsubscribed")]
    PartitionUnsubscribed(u32),

    /// The storage engine failed to apply a record.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Manifest or replication metadata payload could not be encoded/decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The component is shutting down.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WritePathError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl WritePathError {
    /// Create a transport error for a topic/partition.
    pub fn transport(topic: &str, partition: u32, message: impl Into<String>) -> Self {
        Self::Transport {
            topic_partition: format!("{}/{}", topic, partition),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Storage(_) => true,
            Self::Consistency(_) => false,
            Self::Interrupted(_) => false,
            Self::PartitionUnsubscribed(_) => false,
            Self::Serialization(_) => false,
            Self::Config(_) => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Check if this error must terminate the current processing unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Consistency(_) | Self::Interrupted(_))
    }

    /// Check if this is an interruption (cancellation while blocked).
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}
