//! Replication metadata (RMD) model.
//!
//! Every record written by an active-active leader carries conflict
//! resolution state alongside its value:
//!
//! ```text
//! ReplicationMetadata
//! ├── timestamp: TimestampMetadata
//! │   ├── RootLevelTimestamp(i64)        # one timestamp for the whole record
//! │   └── PerFieldTimestamp({field: ts}) # one timestamp per field
//! └── offset_vector: [i64]               # index = source region id
//! ```
//!
//! The offset vector is dense: a region id that was never written reads as 0
//! and gaps are materialized as zeros, never left sparse.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version id stamped on records whose RMD uses this layout.
pub const RMD_VERSION_ID: i32 = 1;

/// Per-field timestamps, ordered by field name.
pub type FieldTimestampMap = BTreeMap<String, i64>;

/// Timestamp portion of replication metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMetadata {
    /// A single logical timestamp covering the whole value.
    RootLevelTimestamp(i64),
    /// Independent timestamps per field of the value.
    PerFieldTimestamp(FieldTimestampMap),
}

/// Conflict resolution metadata for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationMetadata {
    pub timestamp: TimestampMetadata,
    #[serde(default)]
    pub offset_vector: Vec<i64>,
}

impl ReplicationMetadata {
    /// Root-level metadata with an empty offset vector.
    pub fn root_level(timestamp: i64) -> Self {
        Self {
            timestamp: TimestampMetadata::RootLevelTimestamp(timestamp),
            offset_vector: Vec::new(),
        }
    }

    /// Per-field metadata with an empty offset vector.
    pub fn per_field(fields: FieldTimestampMap) -> Self {
        Self {
            timestamp: TimestampMetadata::PerFieldTimestamp(fields),
            offset_vector: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_offset_vector(mut self, offset_vector: Vec<i64>) -> Self {
        self.offset_vector = offset_vector;
        self
    }

    /// Offset recorded for a source region, 0 if never written.
    pub fn offset_for_region(&self, region_id: usize) -> i64 {
        self.offset_vector.get(region_id).copied().unwrap_or(0)
    }

    /// Encode into the opaque payload carried next to the value.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a payload produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
