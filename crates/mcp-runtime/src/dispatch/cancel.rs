//! Pending-request registry.
//!
//! Tracks in-flight identified requests so `notifications/cancelled` can
//! reach them. Keyed by `(session, request id)`; at most one record per key.
//! Records are removed by a guard on every exit path, so a cancellation
//! arriving after completion finds nothing and is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::protocol::RequestId;
use crate::session::SessionId;

type PendingKey = (SessionId, String);

/// Registry of cancel tokens for in-flight requests.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    pending: Arc<RwLock<HashMap<PendingKey, CancellationToken>>>,
}

impl CancelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight request and get its cancel token. The returned
    /// guard removes the record when dropped.
    #[must_use]
    pub fn register(&self, session: &SessionId, id: &RequestId) -> PendingRequest {
        let key = (session.clone(), id.key());
        let token = CancellationToken::new();

        let mut pending = self.pending.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if pending.insert(key.clone(), token.clone()).is_some() {
            tracing::debug!(session_id = %key.0, request_id = %key.1, "Duplicate in-flight request id");
        }
        drop(pending);

        PendingRequest { registry: self.clone(), key, token }
    }

    /// Cancel the in-flight request with this id, if any. Unknown or
    /// completed ids are a no-op.
    pub fn cancel(&self, session: &SessionId, id: &RequestId, reason: Option<&str>) -> bool {
        let key = (session.clone(), id.key());
        let pending = self.pending.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(token) = pending.get(&key) {
            tracing::info!(
                session_id = %key.0,
                request_id = %key.1,
                reason = reason.unwrap_or("unspecified"),
                "Cancelling in-flight request"
            );
            token.cancel();
            true
        } else {
            tracing::debug!(session_id = %key.0, request_id = %key.1, "Cancellation for unknown request id");
            false
        }
    }

    /// Number of in-flight records (diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// True iff nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, key: &PendingKey) {
        self.pending
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }
}

impl std::fmt::Debug for CancelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelRegistry").field("pending", &self.len()).finish()
    }
}

/// Guard for one in-flight record; dropping it deregisters the request.
pub struct PendingRequest {
    registry: CancelRegistry,
    key: PendingKey,
    token: CancellationToken,
}

impl PendingRequest {
    /// The cancel token wired into the request context.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_registered_token() {
        let registry = CancelRegistry::new();
        let session = SessionId::generate();
        let id = RequestId::from("slow-1");

        let pending = registry.register(&session, &id);
        let token = pending.token();
        assert!(!token.is_cancelled());

        assert!(registry.cancel(&session, &id, Some("changed my mind")));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_unknown_id_is_noop() {
        let registry = CancelRegistry::new();
        let session = SessionId::generate();

        assert!(!registry.cancel(&session, &RequestId::from("ghost"), None));
    }

    #[test]
    fn test_completion_deregisters() {
        let registry = CancelRegistry::new();
        let session = SessionId::generate();
        let id = RequestId::from("1");

        {
            let _pending = registry.register(&session, &id);
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());

        // Late cancellation after completion has no observable effect.
        assert!(!registry.cancel(&session, &id, None));
    }

    #[test]
    fn test_records_scoped_per_session() {
        let registry = CancelRegistry::new();
        let a = SessionId::generate();
        let b = SessionId::generate();
        let id = RequestId::from("1");

        let pending_a = registry.register(&a, &id);
        let _pending_b = registry.register(&b, &id);

        assert!(registry.cancel(&a, &id, None));
        assert!(pending_a.token().is_cancelled());

        // Same id in another session is untouched.
        let pending = registry.register(&b, &RequestId::from("2"));
        assert!(!pending.token().is_cancelled());
    }
}
