//! JSON-RPC 2.0 message shapes (spec.md §4.A).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A JSON-RPC request id: either a number or a string, per the spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// A numeric id (what this codebase always generates itself).
    Number(u64),
    /// A string id (accepted from peers for protocol compliance).
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// An outgoing or incoming JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The request id.
    pub id: RequestId,
    /// The method name.
    pub method: String,
    /// Method parameters, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request envelope.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC notification: a request with no id, which never gets a
/// response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The method name.
    pub method: String,
    /// Method parameters, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Build a notification envelope.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// The error code.
    pub code: i64,
    /// A short human-readable description.
    pub message: String,
    /// Additional structured data, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC response: either a result or an error, keyed by the request
/// id it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The id of the request this responds to.
    pub id: RequestId,
    /// The success payload, mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The failure payload, mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

/// Any decoded JSON-RPC message, before the client decides what to do with
/// it.
#[derive(Debug, Clone)]
pub enum McpMessage {
    /// An incoming request (servers rarely send these to us, but the wire
    /// format allows it).
    Request(JsonRpcRequest),
    /// A response to one of our outgoing requests.
    Response(JsonRpcResponse),
    /// A notification (no id, no response expected).
    Notification(JsonRpcNotification),
}

impl McpMessage {
    /// Parse a raw JSON value into the appropriate message variant by
    /// inspecting its shape: a value with `id` and (`result` or `error`) is
    /// a response; a value with `method` and no `id` is a notification; a
    /// value with `method` and `id` is a request.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let has_id = value.get("id").is_some();
        let has_method = value.get("method").is_some();

        if has_id && !has_method {
            serde_json::from_value(value)
                .map(Self::Response)
                .map_err(|e| format!("malformed response: {e}"))
        } else if has_method && !has_id {
            serde_json::from_value(value)
                .map(Self::Notification)
                .map_err(|e| format!("malformed notification: {e}"))
        } else if has_method && has_id {
            serde_json::from_value(value)
                .map(Self::Request)
                .map_err(|e| format!("malformed request: {e}"))
        } else {
            Err("message has neither a recognizable request, response, nor notification shape".to_string())
        }
    }

    /// Serialize back to a raw JSON value for framing.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Request(r) => serde_json::to_value(r).unwrap_or(Value::Null),
            Self::Response(r) => serde_json::to_value(r).unwrap_or(Value::Null),
            Self::Notification(n) => serde_json::to_value(n).unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_response_by_shape() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}});
        assert!(matches!(McpMessage::from_value(value).unwrap(), McpMessage::Response(_)));
    }

    #[test]
    fn classifies_notification_by_shape() {
        let value = json!({"jsonrpc": "2.0", "method": "tools/list_changed"});
        assert!(matches!(McpMessage::from_value(value).unwrap(), McpMessage::Notification(_)));
    }

    #[test]
    fn classifies_request_by_shape() {
        let value = json!({"jsonrpc": "2.0", "id": "abc", "method": "ping"});
        assert!(matches!(McpMessage::from_value(value).unwrap(), McpMessage::Request(_)));
    }

    #[test]
    fn rejects_shapeless_message() {
        let value = json!({"jsonrpc": "2.0"});
        assert!(McpMessage::from_value(value).is_err());
    }
}
