#![no_main]

use libfuzzer_sys::fuzz_target;
use trazo::attributes::AttrValue;

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        // Conversion may reject nulls but must never panic
        let _ = AttrValue::try_from_json("fuzz", value);
    }
});
