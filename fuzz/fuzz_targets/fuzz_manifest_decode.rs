//! Fuzz target for manifest and replication metadata decoding.
//!
//! Stored payloads come from disk and must never panic the decoder.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_write_path::chunking::ChunkedValueManifest;
use replica_write_path::rmd::ReplicationMetadata;

fuzz_target!(|data: &[u8]| {
    if let Ok(manifest) = ChunkedValueManifest::decode(data) {
        // Anything that decodes must encode again.
        let encoded = manifest.encode().unwrap();
        assert_eq!(ChunkedValueManifest::decode(&encoded).unwrap(), manifest);
    }
    let _ = ReplicationMetadata::decode(data);
});
