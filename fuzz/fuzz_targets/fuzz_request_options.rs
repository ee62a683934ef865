//! Fuzz target for caller request options.
//!
//! Tests that arbitrary JSON cannot cause panics when decoded as a request
//! and turned into a bundle item.

#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_core::proxy::wire::BundleItem;
use relay_core::Request;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = serde_json::from_slice::<Request>(data) {
        let _ = BundleItem::from_request(&request);
    }
});
