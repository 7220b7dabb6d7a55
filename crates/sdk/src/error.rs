use std::{io, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the SDK.
///
/// Every public operation resolves to exactly one of these kinds so callers
/// can branch on the failure mode; cancellation and deadline expiry are
/// distinct variants. Underlying causes are preserved through `source()`.
#[derive(Debug, Error)]
pub enum Error {
    /// The `codex app-server` child could not be spawned.
    #[error("failed to spawn `{binary}`: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The server did not answer the `initialize` handshake.
    #[error("server did not complete initialize: {message}")]
    Handshake { message: String },

    /// Structured JSON-RPC error returned by the server.
    ///
    /// `data` is server-controlled and may carry sensitive detail; it is
    /// deliberately omitted from the `Display` rendering and only reachable
    /// through [`Error::rpc_data`].
    #[error("server returned JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Framing, I/O, or codec failure on the duplex byte stream.
    #[error("transport failed: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The per-request deadline elapsed before a response arrived.
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The caller's cancellation token fired.
    #[error("operation canceled")]
    Canceled,

    /// The turn completed with `status = "failed"`.
    #[error(transparent)]
    Turn(#[from] TurnError),

    /// A second consumer attempted to iterate a stream's events.
    #[error("stream events already consumed")]
    StreamConsumed,

    /// A turn was started while another turn was active on the conversation.
    #[error("a turn is already in progress on this conversation")]
    TurnInProgress,

    /// A user-supplied approval handler failed or panicked.
    #[error("approval handler for `{method}` failed: {message}")]
    Handler { method: String, message: String },

    /// Local (de)serialization failure while building or decoding a payload.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn transport_io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True when the error is a timeout, regardless of which request timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True when the error came from explicit cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// True for framing/I-O/codec failures on the underlying stream.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// The JSON-RPC error code, when the server returned a structured error.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Error::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The server-controlled `data` payload of a JSON-RPC error.
    ///
    /// Kept out of `Display` because it may contain sensitive material.
    pub fn rpc_data(&self) -> Option<&Value> {
        match self {
            Error::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// The server-reported turn failure, when the turn ended with
    /// `status = "failed"`.
    pub fn as_turn_error(&self) -> Option<&TurnError> {
        match self {
            Error::Turn(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Server-reported failure payload of a turn that ended with
/// `status = "failed"`.
///
/// The payload is preserved verbatim: `codex_error_info` keeps the raw JSON
/// the server attached so callers (and retries layered on top) can inspect
/// structured error codes without the SDK constraining their shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_error_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_details: Option<String>,
}

impl std::fmt::Display for TurnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "turn failed: {}", self.message)
    }
}

impl std::error::Error for TurnError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_display_omits_data() {
        let err = Error::Rpc {
            code: -32000,
            message: "boom".to_string(),
            data: Some(serde_json::json!({ "apiKey": "sk-secret" })),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("-32000"));
        assert!(rendered.contains("boom"));
        assert!(!rendered.contains("sk-secret"));
        assert_eq!(
            err.rpc_data(),
            Some(&serde_json::json!({ "apiKey": "sk-secret" }))
        );
    }

    #[test]
    fn kind_matching_ignores_payload_detail() {
        let a = Error::Timeout {
            timeout: Duration::from_secs(5),
        };
        let b = Error::Timeout {
            timeout: Duration::from_secs(30),
        };
        assert!(a.is_timeout() && b.is_timeout());
        assert!(!a.is_canceled());

        let x = Error::Rpc {
            code: -32601,
            message: "Method not found".to_string(),
            data: None,
        };
        assert_eq!(x.rpc_code(), Some(-32601));
    }

    #[test]
    fn turn_error_round_trips() {
        let raw = serde_json::json!({
            "message": "model rate limited",
            "codexErrorInfo": { "code": "rate_limit" },
            "additionalDetails": "retry after 30s"
        });
        let parsed: TurnError = serde_json::from_value(raw.clone()).expect("decode");
        assert_eq!(parsed.message, "model rate limited");
        assert_eq!(parsed.additional_details.as_deref(), Some("retry after 30s"));
        assert_eq!(serde_json::to_value(&parsed).expect("encode"), raw);
    }
}
