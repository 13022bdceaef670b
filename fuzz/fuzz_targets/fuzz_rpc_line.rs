#![no_main]

use devtools_runtime::protocol::{decode_line, Decoded, RpcResponse};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The wire decoder must never panic, whatever bytes arrive on the pipe.
    if let Ok(line) = std::str::from_utf8(data) {
        match decode_line(line) {
            Decoded::Call { id, method, params } => {
                // Anything decodable must also serialize back into a
                // well-formed single-line response.
                let response =
                    RpcResponse::result(id.unwrap_or(serde_json::Value::Null), params);
                let out = response.to_line();
                assert!(out.ends_with('\n'));
                let _ = method;
            }
            Decoded::MissingMethod { id } => {
                let response = RpcResponse::error(
                    id.unwrap_or(serde_json::Value::Null),
                    -32600,
                    "Invalid Request",
                );
                let _ = response.to_line();
            }
            Decoded::ParseError => {}
        }
    }
});
