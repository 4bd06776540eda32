//! HTTP + Server-Sent-Events transport.
//!
//! `GET /sse` opens the event stream; `POST /messages` carries client
//! requests. The session rides the `mcp_session_id` cookie, set whenever a
//! new session is created. One session may hold many concurrent streams
//! (reconnects, multiple tabs); server messages fan out to all of them.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config;
use crate::dispatch::Dispatcher;
use crate::error::RpcError;
use crate::session::{InMemorySessionStore, SessionId, SessionStore};
use crate::transport::http::{
    handle_messages_post, handle_sessions_list, health_check, readiness_check, resolve_session,
    session_cookie, HttpState,
};
use crate::transport::{
    ClientId, ClientRegistry, RegistrySink, Transport, TransportInfo, TransportKind,
};

/// SSE transport bound to a port.
pub struct SseTransport {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn SessionStore>,
    clients: Arc<ClientRegistry>,
    port: u16,
    shutdown: CancellationToken,
}

impl SseTransport {
    /// Create an SSE transport over a dispatcher. Installs the fan-out sink
    /// so server-initiated notifications reach connected streams.
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
            .route("/sse", get(handle_sse_get))
            .route("/messages", post(handle_messages_post))
            .route("/sessions", get(handle_sessions_list))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn listen(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!(addr = %addr, "SSE transport listening");

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

        tracing::info!("SSE transport shut down");
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
            kind: TransportKind::Sse,
            description: format!("HTTP POST /messages + GET /sse on port {}", self.port),
        }
    }

    fn set_session_store(&mut self, store: Arc<dyn SessionStore>) {
        self.store = store;
    }
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport").field("port", &self.port).finish()
    }
}

/// `GET /sse`: register a client of the (possibly new) session and stream
/// its outbox as `event: message` frames with periodic keep-alives.
async fn handle_sse_get(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (session, created) = resolve_session(&state.store, &jar, &headers).await;
    let jar = if created { jar.add(session_cookie(&session.id)) } else { jar };

    let (client_id, _tx, rx) = state.clients.register(session.id.clone());
    tracing::info!(session_id = %session.id, client_id = %client_id, "New SSE stream");

    let stream = ClientStream {
        inner: ReceiverStream::new(rx),
        clients: Arc::clone(&state.clients),
        client_id,
    };

    (
        jar,
        [
            ("X-Accel-Buffering", "no"),
            ("Cache-Control", "no-cache, no-store, must-revalidate"),
        ],
        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(config::transport::SSE_KEEPALIVE).text("ping")),
    )
}

/// Outbox stream that deregisters its client when the connection drops.
struct ClientStream {
    inner: ReceiverStream<String>,
    clients: Arc<ClientRegistry>,
    client_id: ClientId,
}

impl Stream for ClientStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|frame| frame.map(|data| Ok(Event::default().event("message").data(data))))
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.clients.remove(&self.client_id);
    }
}
