//! Fuzz target for offset vector merging.
//!
//! This tests that `merge_offset_vector` and `sum_offset_vector` never
//! panic and that the merged entry always holds the new offset.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_write_path::merge::{merge_offset_vector, sum_offset_vector};

fuzz_target!(|data: (Vec<i64>, i64, i16)| {
    let (vector, offset, region) = data;
    let region = i32::from(region);

    let merged = merge_offset_vector(vector.clone(), offset, region);
    let _ = sum_offset_vector(Some(&merged));

    if region < 0 {
        assert_eq!(merged, vector);
    } else {
        assert_eq!(merged[region as usize], offset);
    }
});
