#![no_main]

use libfuzzer_sys::fuzz_target;
use trazo::config::TracerConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Any accepted config must also pass validation on its own
        if let Ok(config) = TracerConfig::from_toml_str(input) {
            assert!(config.validate().is_ok());
        }
    }
});
