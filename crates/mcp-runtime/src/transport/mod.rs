//! Transport layer.
//!
//! Three byte-level carriers share one handler contract: line-delimited
//! stdio, HTTP POST + Server-Sent Events, and WebSocket. The HTTP transports
//! also share the client registry that fans server-initiated messages out to
//! every connected peer of a session.

pub mod http;
pub mod sse;
pub mod stdio;
pub mod ws;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::dispatch::NotificationSink;
use crate::error::RpcError;
use crate::protocol::codec;
use crate::protocol::{OutgoingMessage, Request};
use crate::session::{SessionId, SessionStore};

/// Transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
    WebSocket,
}

/// Metadata surfaced by `Transport::info`.
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub kind: TransportKind,
    pub description: String,
}

/// The contract every transport fulfils.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run until the shutdown token fires or a fatal error occurs.
    async fn listen(&self, shutdown: CancellationToken) -> anyhow::Result<()>;

    /// Deliver a server-initiated message to every client of a session.
    async fn send(&self, session: &SessionId, message: serde_json::Value) -> Result<(), RpcError>;

    /// Graceful drain; idempotent.
    async fn close(&self);

    /// Type and capabilities of this transport.
    fn info(&self) -> TransportInfo;

    /// Swap in a session store; call before `listen`.
    fn set_session_store(&mut self, store: Arc<dyn SessionStore>);
}

/// Identity of one connected peer. A session may have many clients at once
/// (SSE reconnects, multiple tabs).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The string form, for logging.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct ClientHandle {
    session_id: SessionId,
    outbox: mpsc::Sender<String>,
}

/// Connected clients with bounded per-client outboxes. Fan-out drops frames
/// for a full client (logged) without touching the session's other clients;
/// clients whose channel closed are swept on the next send.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client of `session_id`. Returns its id, a sender for
    /// responses, and the receiver the connection's writer drains.
    #[must_use]
    pub fn register(
        &self,
        session_id: SessionId,
    ) -> (ClientId, mpsc::Sender<String>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(config::transport::CLIENT_OUTBOX_CAPACITY);
        let client_id = ClientId::generate();

        self.clients
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(client_id.clone(), ClientHandle { session_id: session_id.clone(), outbox: tx.clone() });

        tracing::info!(client_id = %client_id, session_id = %session_id, "Client connected");
        (client_id, tx, rx)
    }

    /// Remove a client; returns whether it was present. Removing the last
    /// client of a session does not touch the session itself.
    pub fn remove(&self, client_id: &ClientId) -> bool {
        let removed = self
            .clients
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(client_id)
            .is_some();
        if removed {
            tracing::info!(client_id = %client_id, "Client disconnected");
        }
        removed
    }

    /// Fan a frame out to every client of the session. Returns how many
    /// clients accepted it.
    pub fn send_to_session(&self, session_id: &SessionId, frame: &str) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let clients = self.clients.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            for (client_id, handle) in clients.iter() {
                if handle.session_id != *session_id {
                    continue;
                }
                match handle.outbox.try_send(frame.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            client_id = %client_id,
                            session_id = %session_id,
                            "Client outbox full, dropping message"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(client_id.clone());
                    }
                }
            }
        }

        for client_id in closed {
            self.remove(&client_id);
        }
        delivered
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Number of clients bound to one session.
    #[must_use]
    pub fn session_client_count(&self, session_id: &SessionId) -> usize {
        self.clients
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|h| h.session_id == *session_id)
            .count()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry").field("clients", &self.client_count()).finish()
    }
}

/// Notification sink that fans out through a client registry; the HTTP
/// transports install this on the dispatcher.
pub struct RegistrySink {
    clients: Arc<ClientRegistry>,
}

impl RegistrySink {
    /// Wrap a registry.
    #[must_use]
    pub const fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl NotificationSink for RegistrySink {
    async fn notify(&self, session: &SessionId, notification: Request) {
        match serde_json::to_string(&notification) {
            Ok(frame) => {
                let delivered = self.clients.send_to_session(session, &frame);
                tracing::debug!(
                    session_id = %session,
                    method = %notification.method,
                    delivered,
                    "Fanned out notification"
                );
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize notification"),
        }
    }
}

/// Serialize an outbound frame, falling back to an Internal error response
/// so the client always hears back for identified traffic.
pub(crate) fn encode_or_internal(message: &OutgoingMessage) -> String {
    codec::encode_message(message).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to encode response");
        let fallback =
            crate::protocol::Response::from_rpc_error(None, &RpcError::internal("encoding failed"));
        // A plain error envelope always serializes.
        serde_json::to_string(&fallback).unwrap_or_else(|_| String::from("{}"))
    })
}
