// crates/ashfox-server/src/mcp/jsonrpc.rs
// JSON-RPC 2.0 wire types and the MCP error code set.

use serde::Deserialize;
use serde_json::{Value, json};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Initialization and session errors.
pub const SESSION_ERROR: i64 = -32000;
/// The upstream gateway could not be reached.
pub const GATEWAY_UNREACHABLE: i64 = -32004;

/// A single incoming request or notification. Batches are not accepted on
/// this transport.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(key))
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }
}

pub fn response_ok(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build a JSON-RPC error response. `reason` lands in `error.data.reason`
/// as the machine-readable tag the boundary tests key on.
pub fn response_error(id: Option<&Value>, code: i64, message: &str, reason: Option<&str>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(reason) = reason {
        error["data"] = json!({ "reason": reason });
    }
    json!({
        "jsonrpc": "2.0",
        "id": id.cloned().unwrap_or(Value::Null),
        "error": error,
    })
}

/// Wrap a tool result envelope as an MCP tools/call result. Business
/// failures stay inside the result with `isError:true`; JSON-RPC errors
/// are reserved for transport-level problems.
pub fn tool_call_result(envelope: Value) -> Value {
    let ok = envelope.get("ok").and_then(Value::as_bool).unwrap_or(false);
    let text = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
    let mut result = json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": envelope,
    });
    if !ok {
        result["isError"] = json!(true);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_notification() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(req.is_notification());
        assert_eq!(req.method, "notifications/initialized");
    }

    #[test]
    fn error_response_carries_reason() {
        let response = response_error(
            Some(&json!(3)),
            SESSION_ERROR,
            "initialize first",
            Some("server_not_initialized"),
        );
        assert_eq!(response["id"], 3);
        assert_eq!(response["error"]["code"], SESSION_ERROR);
        assert_eq!(response["error"]["data"]["reason"], "server_not_initialized");
    }

    #[test]
    fn error_response_without_id_uses_null() {
        let response = response_error(None, PARSE_ERROR, "bad json", None);
        assert!(response["id"].is_null());
    }

    #[test]
    fn tool_result_marks_business_errors() {
        let failure = tool_call_result(json!({"ok": false, "error": {"code": "no_change"}}));
        assert_eq!(failure["isError"], true);
        assert_eq!(failure["structuredContent"]["error"]["code"], "no_change");

        let success = tool_call_result(json!({"ok": true, "data": {"n": 1}}));
        assert!(success.get("isError").is_none());
        // content carries the serialized envelope for text-only clients.
        let text = success["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("\"ok\":true"));
    }
}
