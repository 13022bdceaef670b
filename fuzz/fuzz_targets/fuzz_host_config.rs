#![no_main]

use devtools_config::{parse_host_config_from_str, strip_jsonc_comments};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(jsonc) = std::str::from_utf8(data) {
        // Comment stripping must never panic or grow the input.
        let stripped = strip_jsonc_comments(jsonc);
        assert!(stripped.len() <= jsonc.len());

        // Parsing may fail, but never crash.
        let _ = parse_host_config_from_str(jsonc);
    }
});
