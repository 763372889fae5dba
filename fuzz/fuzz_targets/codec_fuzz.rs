//! Fuzz test for the record blob decoder
//!
//! Feeds arbitrary bytes to `decode_record` to find panics on malformed
//! durable data. Anything that decodes must survive a re-encode.
//!
//! Run with: cargo +nightly fuzz run codec_fuzz -- -max_total_time=60

#![no_main]

use gqlcache_core::codec::{decode_record, encode_record};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(blob) = std::str::from_utf8(data) else {
        return;
    };

    // Malformed blobs must come back as errors, never panics.
    let Ok(record) = decode_record("Fuzz:1", blob) else {
        return;
    };

    let encoded = encode_record(&record).expect("decoded record re-encodes");
    let decoded = decode_record("Fuzz:1", &encoded).expect("re-encoded blob decodes");
    assert_eq!(record, decoded, "re-encode must be stable");
});
