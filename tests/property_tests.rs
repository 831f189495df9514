//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use proptest::prelude::*;
use replica_write_path::chunking::{chunk_key, split_into_chunks, ChunkedValueManifest, CHUNK_KEY_SUFFIX_LEN};
use replica_write_path::merge::{
    compare_and_return, compare_and_return_with, merge_offset_vector, pick_winner, sum_offset_vector,
    BytewiseTieBreaker, Winner,
};
use replica_write_path::rmd::ReplicationMetadata;
use uuid::Uuid;

// =============================================================================
// Offset Vector Merge Properties
// =============================================================================

proptest! {
    /// The merged entry for the source region is the new offset
    #[test]
    fn merge_sets_source_entry(
        vector in prop::collection::vec(0i64..1_000_000, 0..8),
        offset in 0i64..1_000_000,
        region in 0i32..16,
    ) {
        let merged = merge_offset_vector(vector, offset, region);
        prop_assert_eq!(merged[region as usize], offset);
        prop_assert!(merged.len() >= region as usize + 1);
    }

    /// Entries created to reach the region are zero, existing ones untouched
    #[test]
    fn merge_zero_fills_and_preserves_others(
        vector in prop::collection::vec(0i64..1_000_000, 0..8),
        offset in 0i64..1_000_000,
        region in 0i32..16,
    ) {
        let merged = merge_offset_vector(vector.clone(), offset, region);
        for (i, entry) in merged.iter().enumerate() {
            if i == region as usize {
                continue;
            }
            match vector.get(i) {
                Some(original) => prop_assert_eq!(entry, original),
                None => prop_assert_eq!(*entry, 0),
            }
        }
    }

    /// Unknown provenance leaves the vector unchanged
    #[test]
    fn merge_with_negative_region_is_identity(
        vector in prop::collection::vec(any::<i64>(), 0..8),
        offset in any::<i64>(),
        region in i32::MIN..0,
    ) {
        prop_assert_eq!(merge_offset_vector(vector.clone(), offset, region), vector);
    }

    /// Sum equals the arithmetic sum for values that cannot overflow
    #[test]
    fn sum_matches_iterator_sum(vector in prop::collection::vec(-1_000_000i64..1_000_000, 0..32)) {
        prop_assert_eq!(sum_offset_vector(Some(&vector)), vector.iter().sum::<i64>());
    }
}

#[test]
fn sum_of_missing_or_empty_vector_is_zero() {
    assert_eq!(sum_offset_vector(None), 0);
    assert_eq!(sum_offset_vector(Some(&[])), 0);
    assert_eq!(sum_offset_vector(Some(&[1, 2, 3])), 6);
}

// =============================================================================
// Resolution Properties
// =============================================================================

proptest! {
    /// A delete on either side always wins
    #[test]
    fn resolve_delete_wins(value in prop::collection::vec(any::<u8>(), 0..64)) {
        prop_assert_eq!(compare_and_return(Some(value.as_slice()), None), None);
        prop_assert_eq!(compare_and_return(None, Some(value.as_slice())), None);
    }

    /// The winner is always one of the two candidates
    #[test]
    fn resolve_returns_a_candidate(
        left in prop::collection::vec(any::<u8>(), 0..64),
        right in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let winner = compare_and_return(Some(left.as_slice()), Some(right.as_slice())).unwrap();
        prop_assert!(winner == left.as_slice() || winner == right.as_slice());
    }

    /// Equal candidates keep the left one
    #[test]
    fn resolve_equal_keeps_left(value in prop::collection::vec(any::<u8>(), 0..64)) {
        let copy = value.clone();
        prop_assert_eq!(
            pick_winner(Some(value.as_slice()), Some(copy.as_slice()), &BytewiseTieBreaker),
            Winner::Left
        );
        let winner = compare_and_return(Some(value.as_slice()), Some(copy.as_slice())).unwrap();
        prop_assert!(std::ptr::eq(winner, value.as_slice()));
    }

    /// Byte-wise strategy is order independent for distinct values
    #[test]
    fn bytewise_resolution_is_symmetric(
        left in prop::collection::vec(any::<u8>(), 0..32),
        right in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        prop_assume!(left != right);
        let a = compare_and_return_with(Some(left.as_slice()), Some(right.as_slice()), &BytewiseTieBreaker);
        let b = compare_and_return_with(Some(right.as_slice()), Some(left.as_slice()), &BytewiseTieBreaker);
        prop_assert_eq!(a, b);
    }
}

// =============================================================================
// Chunking Properties
// =============================================================================

proptest! {
    /// Chunks respect the size limit and concatenate back to the value
    #[test]
    fn split_reassembles(
        value in prop::collection::vec(any::<u8>(), 0..2048),
        max in 1usize..512,
    ) {
        let chunks = split_into_chunks(&value, max);
        prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= max));
        prop_assert_eq!(chunks.len(), value.len().div_ceil(max));
        prop_assert_eq!(chunks.concat(), value);
    }

    /// Chunk keys extend the original key and are distinct per producer,
    /// sequence and index
    #[test]
    fn chunk_keys_are_unique(
        key in prop::collection::vec(any::<u8>(), 1..32),
        guid_a in any::<u128>(),
        guid_b in any::<u128>(),
        seq_a in any::<u64>(),
        seq_b in any::<u64>(),
        index_a in any::<u32>(),
        index_b in any::<u32>(),
    ) {
        let a = chunk_key(&key, &Uuid::from_u128(guid_a), seq_a, index_a);
        let b = chunk_key(&key, &Uuid::from_u128(guid_b), seq_b, index_b);
        prop_assert_eq!(a.len(), key.len() + CHUNK_KEY_SUFFIX_LEN);
        prop_assert!(a.starts_with(&key));
        prop_assert_eq!(a == b, guid_a == guid_b && seq_a == seq_b && index_a == index_b);
    }

    /// Manifest encoding survives arbitrary binary keys
    #[test]
    fn manifest_decodes_what_it_encodes(
        keys in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..40), 0..10),
        schema_id in any::<i32>(),
        size in 0usize..1_000_000,
    ) {
        let manifest = ChunkedValueManifest { keys_with_chunk_id_suffix: keys, schema_id, size };
        let decoded = ChunkedValueManifest::decode(&manifest.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded, manifest);
    }

    /// Malformed manifest payloads are errors, never panics
    #[test]
    fn manifest_decode_rejects_garbage(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = ChunkedValueManifest::decode(&bytes);
    }

    /// Replication metadata decoding never panics
    #[test]
    fn rmd_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = ReplicationMetadata::decode(&bytes);
    }
}
