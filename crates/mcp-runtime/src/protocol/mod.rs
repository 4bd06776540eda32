//! JSON-RPC 2.0 protocol layer.
//!
//! Envelope types, MCP message payloads, and the framing codec shared by all
//! transports. Ids are carried opaquely and echoed verbatim; a request whose
//! id is absent, null, or empty is a notification and never receives a
//! response.

pub mod codec;
pub mod messages;

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// JSON-RPC version tag.
pub const VERSION: &str = "2.0";

/// Opaque request id (string or number), echoed back byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(serde_json::Value);

impl RequestId {
    /// Wrap a raw JSON id value.
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// The raw JSON value.
    #[must_use]
    pub const fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// True for `null` and `""`, which mark a notification.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Canonical string form used as a registry key. Strings are used as-is,
    /// numbers in decimal; the wire value itself is never rewritten.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.0 {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(serde_json::Value::String(s.to_string()))
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self(serde_json::Value::Number(n.into()))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    /// Build an identified request.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: impl Into<RequestId>,
    ) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    /// Build a notification (no id).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self { jsonrpc: VERSION.to_string(), method: method.into(), params, id: None }
    }

    /// True iff this request must not receive a response.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        match &self.id {
            None => true,
            Some(id) => id.is_empty(),
        }
    }

    /// Deserialize `params` into a typed payload. Absent or null params read
    /// as an empty object.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, RpcError> {
        let value = match &self.params {
            None | Some(serde_json::Value::Null) => {
                serde_json::Value::Object(serde_json::Map::new())
            }
            Some(value) => value.clone(),
        };
        serde_json::from_value(value).map_err(|e| RpcError::invalid_params(e.to_string()))
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response, exactly one of `result`/`error` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Response {
    /// Build a success response.
    #[must_use]
    pub fn success(id: Option<RequestId>, result: serde_json::Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(VERSION), result: Some(result), error: None, id }
    }

    /// Build an error response with an explicit code.
    #[must_use]
    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(VERSION),
            result: None,
            error: Some(ErrorObject { code, message: message.into(), data: None }),
            id,
        }
    }

    /// Build an error response from the runtime taxonomy.
    #[must_use]
    pub fn from_rpc_error(id: Option<RequestId>, err: &RpcError) -> Self {
        Self::error(id, err.code(), err.to_string())
    }

    /// True iff this response carries an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One parsed inbound frame: a single request or a batch.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Single(Request),
    Batch(Vec<Request>),
}

/// One outbound frame: a single response or a batch response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    Single(Response),
    Batch(Vec<Response>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_detection() {
        let notif = Request::notification("notifications/initialized", None);
        assert!(notif.is_notification());

        let req = Request::new("ping", None, "1");
        assert!(!req.is_notification());

        // Null and empty-string ids count as notifications too.
        let null_id: Request =
            serde_json::from_value(json!({"jsonrpc":"2.0","method":"ping","id":null})).unwrap();
        assert!(null_id.is_notification());

        let empty_id: Request =
            serde_json::from_value(json!({"jsonrpc":"2.0","method":"ping","id":""})).unwrap();
        assert!(empty_id.is_notification());
    }

    #[test]
    fn test_id_echoed_verbatim() {
        let req: Request =
            serde_json::from_value(json!({"jsonrpc":"2.0","method":"ping","id":42})).unwrap();
        let resp = Response::success(req.id, json!({}));
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["id"], json!(42));

        let req: Request =
            serde_json::from_value(json!({"jsonrpc":"2.0","method":"ping","id":"abc"})).unwrap();
        assert_eq!(req.id.unwrap().key(), "abc");
    }

    #[test]
    fn test_response_skips_absent_fields() {
        let resp = Response::success(Some("1".into()), json!({}));
        let wire = serde_json::to_value(&resp).unwrap();
        assert!(wire.get("error").is_none());

        let resp = Response::error(Some("1".into()), -32601, "method not found: nope");
        let wire = serde_json::to_value(&resp).unwrap();
        assert!(wire.get("result").is_none());
        assert_eq!(wire["error"]["code"], json!(-32601));
    }

    #[test]
    fn test_outgoing_batch_serializes_as_array() {
        let out = OutgoingMessage::Batch(vec![
            Response::success(Some("1".into()), json!({})),
            Response::success(Some("2".into()), json!({})),
        ]);
        let wire = serde_json::to_value(&out).unwrap();
        assert!(wire.is_array());
        assert_eq!(wire.as_array().unwrap().len(), 2);
    }
}
