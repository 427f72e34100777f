//! JSON-RPC 2.0 transport to a ledger node or wallet.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

/// EIP-1193 error code for "user rejected the request".
pub const USER_REJECTED_CODE: i64 = 4001;

/// Errors produced by a transport, before normalization into `ChainError`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The endpoint could not be reached or returned something that is not JSON-RPC.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint returned a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl RpcError {
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        RpcError::Remote {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, RpcError::Remote { code, .. } if *code == USER_REJECTED_CODE)
    }

    /// The `data` field of a remote error, when it is a hex string.
    pub fn revert_data(&self) -> Option<&str> {
        match self {
            RpcError::Remote {
                data: Some(Value::String(s)),
                ..
            } => Some(s.as_str()),
            RpcError::Remote {
                data: Some(Value::Object(obj)),
                ..
            } => obj.get("data").and_then(|d| d.as_str()),
            _ => None,
        }
    }
}

/// Sends JSON-RPC requests to a ledger endpoint.
///
/// Implemented by [`HttpTransport`] for real nodes and wallets and by
/// [`SimulatedNode`](crate::simulated::SimulatedNode) for tests.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send one request and return its `result` member.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Human-readable endpoint identifier (URL or simulator name).
    fn endpoint(&self) -> &str;
}

/// JSON-RPC over HTTP POST.
pub struct HttpTransport {
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: &str) -> Self {
        HttpTransport {
            url: url.trim_end_matches('/').to_string(),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Extract the `result` from a JSON-RPC response body.
pub fn parse_response(body: Value) -> Result<Value, RpcError> {
    if let Some(err) = body.get("error") {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(RpcError::Remote {
            code,
            message,
            data: err.get("data").cloned(),
        });
    }
    match body {
        Value::Object(mut obj) if obj.contains_key("result") => {
            Ok(obj.remove("result").unwrap_or(Value::Null))
        }
        other => Err(RpcError::Transport(format!(
            "malformed JSON-RPC response: {}",
            other
        ))),
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let url = self.url.clone();
        tracing::debug!(%url, method, id, "json-rpc request");

        let body = tokio::task::spawn_blocking(move || {
            let config = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .build();
            let agent: ureq::Agent = config.into();
            let response = agent
                .post(&url)
                .send_json(&payload)
                .map_err(|e| RpcError::Transport(format!("{}: {}", url, e)))?;
            response
                .into_body()
                .read_json::<Value>()
                .map_err(|e| RpcError::Transport(format!("invalid JSON from {}: {}", url, e)))
        })
        .await
        .map_err(|e| RpcError::Transport(format!("task join error: {}", e)))??;

        parse_response(body)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_result() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x7a69"});
        assert_eq!(parse_response(body).unwrap(), serde_json::json!("0x7a69"));
    }

    #[test]
    fn parse_null_result() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": null});
        assert_eq!(parse_response(body).unwrap(), Value::Null);
    }

    #[test]
    fn parse_error_object() {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": 4001, "message": "User rejected the request."}
        });
        let err = parse_response(body).unwrap_err();
        assert!(err.is_user_rejection());
        assert_eq!(err.to_string(), "rpc error 4001: User rejected the request.");
    }

    #[test]
    fn parse_malformed() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1});
        assert!(matches!(parse_response(body), Err(RpcError::Transport(_))));
    }

    #[test]
    fn revert_data_from_string_or_nested_object() {
        let err = RpcError::Remote {
            code: 3,
            message: "execution reverted".into(),
            data: Some(serde_json::json!("0x08c379a0")),
        };
        assert_eq!(err.revert_data(), Some("0x08c379a0"));

        let err = RpcError::Remote {
            code: -32603,
            message: "internal".into(),
            data: Some(serde_json::json!({"message": "reverted", "data": "0xdead"})),
        };
        assert_eq!(err.revert_data(), Some("0xdead"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let t = HttpTransport::new("http://127.0.0.1:8545/");
        assert_eq!(t.endpoint(), "http://127.0.0.1:8545");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let t = HttpTransport::new("http://127.0.0.1:9");
        let err = t
            .request("eth_chainId", serde_json::json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }
}
