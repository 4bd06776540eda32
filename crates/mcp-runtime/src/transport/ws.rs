//! WebSocket transport.
//!
//! A single endpoint upgrades to WebSocket; each Text frame carries one
//! JSON-RPC value. `POST /messages` remains as a fallback for non-WS
//! clients. Liveness: server Ping every 30s, read deadline 60s reset by any
//! inbound frame, 10s write deadline per frame. The reader dispatches each
//! frame concurrently; the writer serializes emission; either side exiting
//! cancels the other.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config;
use crate::dispatch::Dispatcher;
use crate::error::RpcError;
use crate::protocol::codec;
use crate::protocol::{OutgoingMessage, Response as RpcResponse};
use crate::session::{InMemorySessionStore, Session, SessionId, SessionStore};
use crate::transport::http::{
    handle_messages_post, handle_sessions_list, health_check, readiness_check, resolve_session,
    session_cookie, HttpState,
};
use crate::transport::{
    encode_or_internal, ClientRegistry, RegistrySink, Transport, TransportInfo, TransportKind,
};

/// WebSocket transport bound to a port.
pub struct WsTransport {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn SessionStore>,
    clients: Arc<ClientRegistry>,
    port: u16,
    shutdown: CancellationToken,
}

impl WsTransport {
    /// Create a WebSocket transport over a dispatcher. Installs the fan-out
    /// sink so server-initiated notifications reach connected sockets.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, port: u16) -> Self {
        let clients = Arc::new(ClientRegistry::new());
        dispatcher.set_notification_sink(Arc::new(RegistrySink::new(Arc::clone(&clients))));

        Self {
            dispatcher,
            store: Arc::new(InMemorySessionStore::new()),
            clients,
            port,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the router; exposed so tests can drive it without a listener.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = Arc::new(HttpState::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.store),
            Arc::clone(&self.clients),
        ));

        Router::new()
            .route("/", get(health_check))
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/ws", get(handle_ws_upgrade))
            .route("/messages", post(handle_messages_post))
            .route("/sessions", get(handle_sessions_list))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn listen(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!(addr = %addr, "WebSocket transport listening");

        let external = shutdown;
        let local = self.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = external.cancelled() => {},
                    () = local.cancelled() => {},
                }
            })
            .await?;

        tracing::info!("WebSocket transport shut down");
        Ok(())
    }

    async fn send(&self, session: &SessionId, message: serde_json::Value) -> Result<(), RpcError> {
        let frame = serde_json::to_string(&message)
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        self.clients.send_to_session(session, &frame);
        Ok(())
    }

    async fn close(&self) {
        self.shutdown.cancel();
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            kind: TransportKind::WebSocket,
            description: format!("WebSocket upgrade + POST /messages on port {}", self.port),
        }
    }

    fn set_session_store(&mut self, store: Arc<dyn SessionStore>) {
        self.store = store;
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").field("port", &self.port).finish()
    }
}

/// `GET /ws`: bind a session (cookie first, then `X-MCP-Session-ID`, then
/// create) and upgrade.
async fn handle_ws_upgrade(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let (session, created) = resolve_session(&state.store, &jar, &headers).await;
    let jar = if created { jar.add(session_cookie(&session.id)) } else { jar };

    let response = ws.on_upgrade(move |socket| handle_socket(state, socket, session));
    (jar, response).into_response()
}

async fn handle_socket(state: Arc<HttpState>, socket: WebSocket, session: Arc<Session>) {
    let (client_id, tx, mut rx) = state.clients.register(session.id.clone());
    tracing::info!(session_id = %session.id, client_id = %client_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();
    let conn = CancellationToken::new();

    // Writer: serializes frame emission and owns the ping schedule.
    let writer_token = conn.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(config::transport::WS_PING_INTERVAL);
        ping.tick().await; // first tick fires immediately
        loop {
            let frame = tokio::select! {
                () = writer_token.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => Some(frame),
                    None => break,
                },
                _ = ping.tick() => None,
            };

            let message = match frame {
                Some(frame) => Message::Text(frame.into()),
                None => Message::Ping(Bytes::new()),
            };
            match tokio::time::timeout(config::transport::WS_WRITE_TIMEOUT, sink.send(message))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
                Err(_) => {
                    tracing::warn!("WebSocket write deadline exceeded");
                    break;
                }
            }
        }
        writer_token.cancel();
    });

    // Reader: parses frames and dispatches each one concurrently. Any
    // inbound frame resets the read deadline.
    loop {
        let next = tokio::select! {
            () = conn.cancelled() => break,
            next = tokio::time::timeout(config::transport::WS_READ_DEADLINE, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                tracing::info!(client_id = %client_id, "WebSocket read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(error = %e, "WebSocket read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let dispatcher = Arc::clone(&state.dispatcher);
                let session = Arc::clone(&session);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outgoing = match codec::parse_message(text.as_bytes()) {
                        Ok(incoming) => dispatcher.dispatch(&session, incoming).await,
                        Err(error) => {
                            Some(OutgoingMessage::Single(RpcResponse::from_rpc_error(None, &error)))
                        }
                    };
                    if let Some(outgoing) = outgoing {
                        let frame = encode_or_internal(&outgoing);
                        if tx.send(frame).await.is_err() {
                            tracing::debug!("WebSocket writer gone, dropping response");
                        }
                    }
                });
            }
            Message::Close(_) => break,
            // Pong and Ping only matter for liveness; Binary frames are not
            // part of the protocol.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    conn.cancel();
    state.clients.remove(&client_id);
    let _ = writer.await;
    tracing::info!(client_id = %client_id, "WebSocket closed");
}
