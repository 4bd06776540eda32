//! Per-request execution context.
//!
//! Carries the session, the cancellation token wired by the dispatcher, and
//! an extension map middlewares may enrich (e.g. an auth subject).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::protocol::RequestId;
use crate::session::Session;

/// Context handed to every handler, middleware, and tool call.
pub struct RequestContext {
    /// The session this request executes on behalf of.
    pub session: Arc<Session>,
    /// Cancel token derived for this request; long-running work must watch
    /// it and return promptly when it fires.
    pub cancel: CancellationToken,
    /// The originating request id, if the request was identified.
    pub request_id: Option<RequestId>,
    extensions: RwLock<HashMap<String, serde_json::Value>>,
}

impl RequestContext {
    /// Build a context for one request.
    #[must_use]
    pub fn new(
        session: Arc<Session>,
        cancel: CancellationToken,
        request_id: Option<RequestId>,
    ) -> Self {
        Self { session, cancel, request_id, extensions: RwLock::new(HashMap::new()) }
    }

    /// True once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Attach a named extension value (middleware enrichment).
    pub async fn set_extension(&self, key: impl Into<String>, value: serde_json::Value) {
        self.extensions.write().await.insert(key.into(), value);
    }

    /// Read a named extension value.
    pub async fn extension(&self, key: &str) -> Option<serde_json::Value> {
        self.extensions.read().await.get(key).cloned()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("session", &self.session.id)
            .field("request_id", &self.request_id)
            .finish()
    }
}
