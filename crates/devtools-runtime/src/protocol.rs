//! Newline-delimited JSON-RPC 2.0 wire types.
//!
//! One JSON object per line, UTF-8. Requests carry `method` and optionally
//! `id` and `params`. An object without an `id` field is a notification and
//! receives no response; `"id": null` is a real id and is echoed verbatim.

use serde::Serialize;
use serde_json::{Map, Value};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

pub const PING_METHOD: &str = "system.ping";

/// One decoded input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The line was not valid JSON.
    ParseError,
    /// Valid JSON, but no `method` string. `id` is echoed when present.
    MissingMethod { id: Option<Value> },
    /// A dispatchable call. `id: None` means notification.
    Call {
        id: Option<Value>,
        method: String,
        params: Value,
    },
}

/// Decode one line into a dispatch decision.
pub fn decode_line(line: &str) -> Decoded {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Decoded::ParseError,
    };

    let obj = match value.as_object() {
        Some(o) => o,
        None => return Decoded::MissingMethod { id: None },
    };

    // Absent and `null` ids are distinct: only the former is a notification.
    let id = obj.get("id").cloned();

    let method = match obj.get("method").and_then(Value::as_str) {
        Some(m) => m.to_string(),
        None => return Decoded::MissingMethod { id },
    };

    let params = obj
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    Decoded::Call { id, method, params }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

/// Outgoing response; exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    /// Serialize as one newline-terminated wire line.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            // A response we built ourselves always serializes; keep the
            // connection alive even if that assumption ever breaks.
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"response serialization failed"}}"#.to_string()
        });
        line.push('\n');
        line
    }
}

/// Build an outgoing request line. `id: None` produces a notification.
pub fn request_line(id: Option<u64>, method: &str, params: &Value) -> String {
    let mut obj = Map::new();
    obj.insert("jsonrpc".to_string(), Value::from("2.0"));
    if let Some(id) = id {
        obj.insert("id".to_string(), Value::from(id));
    }
    obj.insert("method".to_string(), Value::from(method));
    if !params.is_null() {
        obj.insert("params".to_string(), params.clone());
    }
    let mut line = Value::Object(obj).to_string();
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_malformed_line() {
        assert_eq!(decode_line("{malformed"), Decoded::ParseError);
        assert_eq!(decode_line(""), Decoded::ParseError);
    }

    #[test]
    fn test_decode_non_object() {
        assert_eq!(
            decode_line(r#"["not", "an", "object"]"#),
            Decoded::MissingMethod { id: None }
        );
    }

    #[test]
    fn test_decode_missing_method_echoes_id() {
        assert_eq!(
            decode_line(r#"{"jsonrpc":"2.0","id":3}"#),
            Decoded::MissingMethod { id: Some(json!(3)) }
        );
    }

    #[test]
    fn test_decode_null_id_is_not_notification() {
        let decoded = decode_line(r#"{"jsonrpc":"2.0","id":null,"method":"system.ping"}"#);
        assert_eq!(
            decoded,
            Decoded::Call {
                id: Some(Value::Null),
                method: "system.ping".to_string(),
                params: json!({}),
            }
        );
    }

    #[test]
    fn test_decode_absent_id_is_notification() {
        let decoded = decode_line(r#"{"jsonrpc":"2.0","method":"clientShuttingDown"}"#);
        assert_eq!(
            decoded,
            Decoded::Call {
                id: None,
                method: "clientShuttingDown".to_string(),
                params: json!({}),
            }
        );
    }

    #[test]
    fn test_decode_params_default_to_empty_object() {
        match decode_line(r#"{"id":1,"method":"getStatus"}"#) {
            Decoded::Call { params, .. } => assert_eq!(params, json!({})),
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_response_wire_format() {
        let line = RpcResponse::error(Value::Null, PARSE_ERROR, "Parse error").to_line();
        assert_eq!(
            line,
            "{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{\"code\":-32700,\"message\":\"Parse error\"}}\n"
        );
    }

    #[test]
    fn test_result_response_echoes_id_verbatim() {
        let line = RpcResponse::result(json!("abc-1"), json!({"ok": true})).to_line();
        assert_eq!(
            line,
            "{\"jsonrpc\":\"2.0\",\"id\":\"abc-1\",\"result\":{\"ok\":true}}\n"
        );
    }

    #[test]
    fn test_request_line_notification_has_no_id() {
        let line = request_line(None, "clientShuttingDown", &json!({}));
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["method"], "clientShuttingDown");
    }
}
