use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Wire error codes the router emits for inbound server requests.
pub(crate) const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub(crate) const CODE_INVALID_PARAMS: i64 = -32602;
pub(crate) const CODE_INTERNAL_ERROR: i64 = -32603;
pub(crate) const CODE_HANDLER_ERROR: i64 = -32000;

/// JSON-RPC request/response id.
///
/// Outbound ids are client-assigned monotonic integers; server-originated
/// requests may use either form and both round-trip. The `Int` variant is
/// listed first so a numeric id never decodes as a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Int(id) => write!(f, "{id}"),
            RequestId::Str(id) => write!(f, "{id}"),
        }
    }
}

/// Structured error payload of a JSON-RPC response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct RpcErrorPayload {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One inbound message, classified.
#[derive(Debug)]
pub(crate) enum Incoming {
    /// `id` and `method` present: the server is calling us.
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// `id` present, no `method`: a reply to one of our requests.
    Response {
        id: RequestId,
        result: Option<Value>,
        error: Option<RpcErrorPayload>,
    },
    /// No `id`: fire-and-forget notification.
    Notification { method: String, params: Value },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorPayload>,
}

/// Classifies a raw envelope. `None` when the value is not an object or has
/// neither an id nor a method.
pub(crate) fn classify(value: Value) -> Option<Incoming> {
    // `"result": null` is a valid success reply; presence must be checked
    // structurally because Option<Value> folds null into None.
    let has_result = value.get("result").is_some();
    let envelope: RawEnvelope = serde_json::from_value(value).ok()?;
    match (envelope.id, envelope.method) {
        (Some(id), Some(method)) => Some(Incoming::Request {
            id,
            method,
            params: envelope.params.unwrap_or(Value::Null),
        }),
        (Some(id), None) => Some(Incoming::Response {
            id,
            result: has_result.then(|| envelope.result.unwrap_or(Value::Null)),
            error: envelope.error,
        }),
        (None, Some(method)) => Some(Incoming::Notification {
            method,
            params: envelope.params.unwrap_or(Value::Null),
        }),
        (None, None) => None,
    }
}

pub(crate) fn request_envelope(id: &RequestId, method: &str, params: &Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

pub(crate) fn response_envelope(id: &RequestId, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

pub(crate) fn error_envelope(id: &RequestId, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_prefer_integers() {
        let id: RequestId = serde_json::from_value(json!(7)).expect("decode");
        assert_eq!(id, RequestId::Int(7));
        let id: RequestId = serde_json::from_value(json!("approval-1")).expect("decode");
        assert_eq!(id, RequestId::Str("approval-1".to_string()));
        assert_eq!(serde_json::to_value(RequestId::Int(7)).expect("encode"), json!(7));
        assert_eq!(
            serde_json::to_value(RequestId::Str("approval-1".to_string())).expect("encode"),
            json!("approval-1")
        );
    }

    #[test]
    fn classification_rules() {
        let request = classify(json!({
            "jsonrpc": "2.0",
            "id": "approval-1",
            "method": "applyPatchApproval",
            "params": {}
        }));
        assert!(matches!(
            request,
            Some(Incoming::Request { id: RequestId::Str(_), .. })
        ));

        let response = classify(json!({ "jsonrpc": "2.0", "id": 3, "result": { "ok": true } }));
        match response {
            Some(Incoming::Response { id, result, error }) => {
                assert_eq!(id, RequestId::Int(3));
                assert_eq!(result, Some(json!({ "ok": true })));
                assert!(error.is_none());
            }
            other => panic!("unexpected classification: {other:?}"),
        }

        let notification =
            classify(json!({ "jsonrpc": "2.0", "method": "turn/started", "params": {} }));
        assert!(matches!(notification, Some(Incoming::Notification { .. })));

        assert!(classify(json!({ "jsonrpc": "2.0" })).is_none());
        assert!(classify(json!("not an envelope")).is_none());
    }

    #[test]
    fn null_result_is_still_a_result() {
        let response = classify(json!({ "jsonrpc": "2.0", "id": 4, "result": null }));
        match response {
            Some(Incoming::Response { result, error, .. }) => {
                assert_eq!(result, Some(Value::Null));
                assert!(error.is_none());
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn error_envelope_shape() {
        let envelope = error_envelope(&RequestId::Str("approval-1".to_string()), -32601, "Method not found");
        assert_eq!(
            envelope,
            json!({
                "jsonrpc": "2.0",
                "id": "approval-1",
                "error": { "code": -32601, "message": "Method not found" }
            })
        );
    }
}
