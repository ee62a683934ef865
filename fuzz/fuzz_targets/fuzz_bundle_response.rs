//! Fuzz target for bundle response decoding.
//!
//! Arbitrary text arrives the way legacy endpoints deliver it: as a string
//! body that must be parsed before demultiplexing. Decoding and classifying
//! must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_core::proxy::wire::{classify_entry, decode_bundle_response};
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data).into_owned();
    if let Ok(Some(responses)) = decode_bundle_response(Value::String(text)) {
        for (key, entry) in responses {
            let _ = key.parse::<relay_core::RequestId>();
            let _ = classify_entry(entry);
        }
    }
});
