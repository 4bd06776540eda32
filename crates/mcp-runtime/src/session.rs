//! Session management.
//!
//! A session is the server-side identity of a logical client, independent of
//! individual connections: SSE reconnects and multiple tabs share one
//! session. Sessions carry an opaque state map plus the negotiated
//! initialization state, and are swept by a background cleanup task when
//! stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config;
use crate::protocol::messages::{ClientCapabilities, Implementation};

/// Opaque, globally unique session identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The string form carried in cookies and headers.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Initialization handshake state, per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitState {
    /// No `initialize` seen yet.
    #[default]
    Uninitialized,
    /// `initialize` answered, waiting for `notifications/initialized`.
    Initializing,
    /// Client declared readiness; server-initiated traffic is allowed.
    Initialized,
    /// Session is shutting down.
    Closed,
}

/// Negotiated facts about the peer, replaced wholesale on re-initialize.
#[derive(Debug, Clone, Default)]
pub struct Negotiated {
    pub protocol_version: Option<String>,
    pub client_info: Option<Implementation>,
    pub client_capabilities: Option<ClientCapabilities>,
}

/// A single session.
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Opaque per-session state.
    state: RwLock<HashMap<String, serde_json::Value>>,
    /// Handshake progress.
    init: RwLock<InitState>,
    /// Peer facts from the most recent `initialize`.
    negotiated: RwLock<Negotiated>,
    /// Last activity timestamp.
    last_active: RwLock<Instant>,
}

impl Session {
    /// Create a new session with the given id.
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            state: RwLock::new(HashMap::new()),
            init: RwLock::new(InitState::default()),
            negotiated: RwLock::new(Negotiated::default()),
            last_active: RwLock::new(Instant::now()),
        }
    }

    /// Read one state key.
    pub async fn get_state(&self, key: &str) -> Option<serde_json::Value> {
        self.state.read().await.get(key).cloned()
    }

    /// Set one state key.
    pub async fn set_state(&self, key: impl Into<String>, value: serde_json::Value) {
        self.state.write().await.insert(key.into(), value);
    }

    /// Delete one state key; returns whether it existed.
    pub async fn delete_state(&self, key: &str) -> bool {
        self.state.write().await.remove(key).is_some()
    }

    /// Snapshot of the state keys.
    pub async fn state_keys(&self) -> Vec<String> {
        self.state.read().await.keys().cloned().collect()
    }

    /// Current handshake state.
    pub async fn init_state(&self) -> InitState {
        *self.init.read().await
    }

    /// Advance the handshake state.
    pub async fn set_init_state(&self, state: InitState) {
        *self.init.write().await = state;
    }

    /// Replace the negotiated peer facts (re-initialize replaces, never
    /// merges).
    pub async fn set_negotiated(&self, negotiated: Negotiated) {
        *self.negotiated.write().await = negotiated;
    }

    /// Snapshot of the negotiated peer facts.
    pub async fn negotiated(&self) -> Negotiated {
        self.negotiated.read().await.clone()
    }

    /// Update last activity timestamp.
    pub async fn touch(&self) {
        *self.last_active.write().await = Instant::now();
    }

    /// Check if the session has been idle past the stale timeout.
    pub async fn is_stale(&self) -> bool {
        self.last_active.read().await.elapsed() > config::session::STALE_TIMEOUT
    }

    /// Seconds since the last activity.
    pub async fn idle_secs(&self) -> u64 {
        self.last_active.read().await.elapsed().as_secs()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Session metadata surfaced by `list`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionMeta {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
}

/// Thread-safe store of session id → session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a fresh session.
    async fn create(&self) -> Arc<Session>;

    /// Look up a session by id.
    async fn get(&self, id: &SessionId) -> Option<Arc<Session>>;

    /// Return the session with the given id, or create one. A known id also
    /// refreshes the activity timestamp.
    async fn get_or_create(&self, id: Option<&SessionId>) -> Arc<Session>;

    /// Refresh a session's activity timestamp.
    async fn touch(&self, id: &SessionId);

    /// Remove a session; returns whether it existed.
    async fn delete(&self, id: &SessionId) -> bool;

    /// Metadata for all live sessions.
    async fn list(&self) -> Vec<SessionMeta>;

    /// Number of live sessions.
    async fn count(&self) -> usize;
}

/// Default in-memory store guarded by a reader-writer lock.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all stale sessions; returns how many were dropped.
    pub async fn cleanup_stale_sessions(&self) -> usize {
        let mut to_remove = Vec::new();

        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.is_stale().await {
                    to_remove.push(id.clone());
                }
            }
        }

        let count = to_remove.len();
        if count > 0 {
            let mut sessions = self.sessions.write().await;
            for id in to_remove {
                sessions.remove(&id);
                tracing::info!(session_id = %id, "Cleaned up stale session");
            }
        }

        count
    }

    /// Spawn the periodic stale-session sweep.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config::session::CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                let cleaned = store.cleanup_stale_sessions().await;
                if cleaned > 0 {
                    tracing::debug!(count = cleaned, "Session cleanup completed");
                }
            }
        });
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self) -> Arc<Session> {
        let id = SessionId::generate();
        let session = Arc::new(Session::new(id.clone()));

        self.sessions.write().await.insert(id, session.clone());

        tracing::info!(session_id = %session.id, "Created new session");
        session
    }

    async fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn get_or_create(&self, id: Option<&SessionId>) -> Arc<Session> {
        if let Some(id) = id {
            if let Some(session) = self.get(id).await {
                session.touch().await;
                return session;
            }
        }
        self.create().await
    }

    async fn touch(&self, id: &SessionId) {
        if let Some(session) = self.get(id).await {
            session.touch().await;
        }
    }

    async fn delete(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Removed session");
        }
        removed
    }

    async fn list(&self) -> Vec<SessionMeta> {
        let sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        let mut metas = Vec::with_capacity(sessions.len());
        for session in sessions {
            metas.push(SessionMeta {
                id: session.id.clone(),
                created_at: session.created_at,
                idle_secs: session.idle_secs().await,
            });
        }
        metas
    }

    async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore").finish()
    }
}
