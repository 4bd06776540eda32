//! Framing codec shared by all transports.
//!
//! One JSON value per frame (a line on stdio, an HTTP body, a WebSocket text
//! frame). A batch is detected by its first non-whitespace byte being `[`.

use crate::error::RpcError;
use crate::protocol::{IncomingMessage, OutgoingMessage, Request, VERSION};

/// Parse one inbound frame into a single request or a batch.
///
/// # Errors
///
/// `Parse` for invalid JSON, `InvalidRequest` for a malformed envelope or an
/// empty batch.
pub fn parse_message(bytes: &[u8]) -> Result<IncomingMessage, RpcError> {
    if is_batch(bytes) {
        let values: Vec<serde_json::Value> =
            serde_json::from_slice(bytes).map_err(|e| RpcError::parse(e.to_string()))?;
        if values.is_empty() {
            return Err(RpcError::invalid_request("empty batch"));
        }
        let requests =
            values.into_iter().map(validate_request).collect::<Result<Vec<_>, _>>()?;
        Ok(IncomingMessage::Batch(requests))
    } else {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| RpcError::parse(e.to_string()))?;
        Ok(IncomingMessage::Single(validate_request(value)?))
    }
}

/// True iff the frame's first non-whitespace byte opens a JSON array.
#[must_use]
pub fn is_batch(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'[')
}

/// Serialize an outbound frame to its wire form.
///
/// # Errors
///
/// `Internal` if serialization fails, which only happens on non-string map
/// keys in handler output.
pub fn encode_message(message: &OutgoingMessage) -> Result<String, RpcError> {
    serde_json::to_string(message).map_err(|e| RpcError::internal(e.to_string()))
}

fn validate_request(value: serde_json::Value) -> Result<Request, RpcError> {
    if !value.is_object() {
        return Err(RpcError::invalid_request("request must be a JSON object"));
    }
    match value.get("jsonrpc").and_then(|v| v.as_str()) {
        Some(v) if v == VERSION => {}
        Some(v) => {
            return Err(RpcError::invalid_request(format!(
                "unsupported jsonrpc version: {v}"
            )));
        }
        None => return Err(RpcError::invalid_request("missing jsonrpc version")),
    }
    match value.get("method").and_then(|v| v.as_str()) {
        Some(m) if !m.is_empty() => {}
        _ => return Err(RpcError::invalid_request("missing method")),
    }
    serde_json::from_value(value).map_err(|e| RpcError::invalid_request(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Response;
    use serde_json::json;

    #[test]
    fn test_parse_single_request() {
        let msg = parse_message(br#"{"jsonrpc":"2.0","id":"1","method":"ping"}"#).unwrap();
        match msg {
            IncomingMessage::Single(req) => {
                assert_eq!(req.method, "ping");
                assert!(!req.is_notification());
            }
            IncomingMessage::Batch(_) => panic!("expected single"),
        }
    }

    #[test]
    fn test_parse_batch_by_leading_bracket() {
        let msg = parse_message(
            br#"  [{"jsonrpc":"2.0","id":"1","method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"}]"#,
        )
        .unwrap();
        match msg {
            IncomingMessage::Batch(reqs) => {
                assert_eq!(reqs.len(), 2);
                assert!(reqs[1].is_notification());
            }
            IncomingMessage::Single(_) => panic!("expected batch"),
        }
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_message(b"{not json").unwrap_err();
        assert_eq!(err.code(), -32700);
    }

    #[test]
    fn test_missing_version_is_invalid_request() {
        let err = parse_message(br#"{"method":"ping","id":"1"}"#).unwrap_err();
        assert_eq!(err.code(), -32600);

        let err = parse_message(br#"{"jsonrpc":"1.0","method":"ping"}"#).unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn test_missing_method_is_invalid_request() {
        let err = parse_message(br#"{"jsonrpc":"2.0","id":"1"}"#).unwrap_err();
        assert_eq!(err.code(), -32600);

        let err = parse_message(br#"{"jsonrpc":"2.0","method":"","id":"1"}"#).unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn test_empty_batch_is_invalid_request() {
        let err = parse_message(b"[]").unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let out = OutgoingMessage::Single(Response::success(Some("7".into()), json!({"ok":true})));
        let wire = encode_message(&out).unwrap();
        let back: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(back["jsonrpc"], "2.0");
        assert_eq!(back["id"], "7");
        assert_eq!(back["result"]["ok"], true);
    }
}
