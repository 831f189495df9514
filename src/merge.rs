//! Conflict resolution primitives.
//!
//! Pure functions over replication metadata: classify the timestamp shape,
//! pick a winner between two candidate values, and maintain the per-region
//! offset vector. Nothing here does I/O or needs locking.
//!
//! # Tie-breaking
//!
//! When two writes carry the same timestamp the winner is chosen by
//! [`compare_and_return`]:
//!
//! ```text
//! left == None            → left   (delete wins; both None → left)
//! right == None           → right  (delete wins)
//! prefer_left(left,right) → left   (TieBreaker, default: fingerprint >=)
//! otherwise               → right
//! ```
//!
//! The default [`FingerprintTieBreaker`] compares content fingerprints, which
//! is only an approximate order: two distinct values may collide and then the
//! left one wins. The fingerprint is the SHA-256 prefix of the bytes, so every
//! region picks the same winner regardless of how its leader was built. [`BytewiseTieBreaker`] is a fully deterministic alternative
//! for callers that need it.

use crate::rmd::{ReplicationMetadata, TimestampMetadata};
use sha2::{Digest, Sha256};

/// Shape of the timestamp stored in replication metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMetadataType {
    RootLevelTimestamp,
    PerFieldTimestamp,
}

/// Classify metadata by the shape of its timestamp payload.
pub fn classify(timestamp: &TimestampMetadata) -> ReplicationMetadataType {
    match timestamp {
        TimestampMetadata::RootLevelTimestamp(_) => ReplicationMetadataType::RootLevelTimestamp,
        TimestampMetadata::PerFieldTimestamp(_) => ReplicationMetadataType::PerFieldTimestamp,
    }
}

/// Strategy deciding between two non-null candidates with equal timestamps.
pub trait TieBreaker<T: ?Sized>: Send + Sync {
    /// Returns `true` if `left` should win over `right`.
    fn prefer_left(&self, left: &T, right: &T) -> bool;
}

/// Higher content fingerprint wins, equal fingerprints keep the left value.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintTieBreaker;

impl<T: AsRef<[u8]> + ?Sized> TieBreaker<T> for FingerprintTieBreaker {
    fn prefer_left(&self, left: &T, right: &T) -> bool {
        fingerprint(left) >= fingerprint(right)
    }
}

/// Lexicographically larger bytes win, equal bytes keep the left value.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseTieBreaker;

impl<T: AsRef<[u8]> + ?Sized> TieBreaker<T> for BytewiseTieBreaker {
    fn prefer_left(&self, left: &T, right: &T) -> bool {
        left.as_ref() >= right.as_ref()
    }
}

/// Content-derived fingerprint: the first 8 bytes of the SHA-256 digest,
/// big-endian.
pub fn fingerprint<T: AsRef<[u8]> + ?Sized>(value: &T) -> u64 {
    let digest = Sha256::digest(value.as_ref());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Which side of a comparison won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Left,
    Right,
}

/// Decide the winner between two candidates using the given strategy.
pub fn pick_winner<T: ?Sized, B: TieBreaker<T> + ?Sized>(
    left: Option<&T>,
    right: Option<&T>,
    tie_breaker: &B,
) -> Winner {
    match (left, right) {
        (None, _) => Winner::Left,
        (_, None) => Winner::Right,
        (Some(l), Some(r)) => {
            if tie_breaker.prefer_left(l, r) {
                Winner::Left
            } else {
                Winner::Right
            }
        }
    }
}

/// Return the winning candidate using the fingerprint tie-break.
///
/// `None` models a delete and always wins.
pub fn compare_and_return<'a, T: AsRef<[u8]> + ?Sized>(left: Option<&'a T>, right: Option<&'a T>) -> Option<&'a T> {
    compare_and_return_with(left, right, &FingerprintTieBreaker)
}

/// [`compare_and_return`] with an explicit tie-break strategy.
pub fn compare_and_return_with<'a, T: ?Sized, B: TieBreaker<T> + ?Sized>(
    left: Option<&'a T>,
    right: Option<&'a T>,
    tie_breaker: &B,
) -> Option<&'a T> {
    match pick_winner(left, right, tie_breaker) {
        Winner::Left => left,
        Winner::Right => right,
    }
}

/// Record `new_offset` as the latest offset seen from `source_region_id`.
///
/// A negative region id means provenance is unknown; the vector is returned
/// untouched. Otherwise the vector is zero-filled up to the region and the
/// entry is overwritten (last write wins per region, not max).
pub fn merge_offset_vector(mut offset_vector: Vec<i64>, new_offset: i64, source_region_id: i32) -> Vec<i64> {
    if source_region_id < 0 {
        return offset_vector;
    }
    let index = source_region_id as usize;
    if offset_vector.len() <= index {
        offset_vector.resize(index + 1, 0);
    }
    offset_vector[index] = new_offset;
    offset_vector
}

/// Sum of all offset vector entries.
///
/// Only a coarse progress heuristic; never a causal order.
pub fn sum_offset_vector(offset_vector: Option<&[i64]>) -> i64 {
    offset_vector
        .map(|v| v.iter().fold(0i64, |acc, o| acc.wrapping_add(*o)))
        .unwrap_or(0)
}

/// Offset vector sum of a record's metadata, 0 if there is none.
pub fn extract_offset_vector_sum(rmd: Option<&ReplicationMetadata>) -> i64 {
    sum_offset_vector(rmd.map(|r| r.offset_vector.as_slice()))
}

/// Timestamps of a record's metadata.
///
/// Root-level metadata yields its single timestamp. Per-field metadata is not
/// supported yet and yields a single `0` placeholder, as does missing metadata.
pub fn extract_timestamps(rmd: Option<&ReplicationMetadata>) -> Vec<i64> {
    let Some(rmd) = rmd else {
        return vec![0];
    };
    match &rmd.timestamp {
        TimestampMetadata::RootLevelTimestamp(ts) => vec![*ts],
        // TODO: return the per-field timestamps of the fields touched by the incoming operation
        TimestampMetadata::PerFieldTimestamp(_) => vec![0],
    }
}
