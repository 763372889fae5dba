//! Fuzz test for serialized cache reference parsing
//!
//! Run with: cargo +nightly fuzz run reference_fuzz -- -max_total_time=60

#![no_main]

use gqlcache_core::CacheReference;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(Some(reference)) = CacheReference::deserialize(input) {
            // A parsed reference serializes back to its input.
            assert_eq!(reference.serialize(), input);
        }
    }
});
