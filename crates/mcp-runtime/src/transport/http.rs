//! Shared plumbing for the HTTP transports.
//!
//! Session binding (cookie first, then the `X-MCP-Session-ID` header), the
//! `POST /messages` ingress both HTTP transports expose, and the diagnostics
//! routes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::config;
use crate::dispatch::Dispatcher;
use crate::protocol::codec;
use crate::protocol::Response as RpcResponse;
use crate::session::{Session, SessionId, SessionStore};
use crate::transport::ClientRegistry;

/// State shared by the HTTP routers.
pub struct HttpState {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn SessionStore>,
    pub clients: Arc<ClientRegistry>,
}

impl HttpState {
    /// Bundle the pieces a router needs.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn SessionStore>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self { dispatcher, store, clients }
    }
}

/// Resolve the session a request belongs to: cookie, then header, then a
/// fresh session. The bool is true when a new session was created and the
/// response must set the cookie.
pub(crate) async fn resolve_session(
    store: &Arc<dyn SessionStore>,
    jar: &CookieJar,
    headers: &HeaderMap,
) -> (Arc<Session>, bool) {
    if let Some(cookie) = jar.get(config::transport::SESSION_COOKIE) {
        let id = SessionId::from(cookie.value());
        if let Some(session) = store.get(&id).await {
            session.touch().await;
            return (session, false);
        }
    }

    if let Some(value) = headers
        .get(config::transport::SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        let id = SessionId::from(value);
        if let Some(session) = store.get(&id).await {
            session.touch().await;
            return (session, false);
        }
    }

    (store.create().await, true)
}

/// The session cookie: HttpOnly, Lax, path `/`.
pub(crate) fn session_cookie(session_id: &SessionId) -> Cookie<'static> {
    Cookie::build((config::transport::SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// `POST /messages`: accepts one JSON-RPC value (single or batch). Requests
/// get the JSON-RPC response in the HTTP body; notification-only input gets
/// 204. Malformed payloads map to an HTTP status plus a JSON-RPC error body.
pub(crate) async fn handle_messages_post(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (session, created) = resolve_session(&state.store, &jar, &headers).await;
    let jar = if created { jar.add(session_cookie(&session.id)) } else { jar };

    match codec::parse_message(&body) {
        Ok(message) => match state.dispatcher.dispatch(&session, message).await {
            Some(outgoing) => (jar, Json(outgoing)).into_response(),
            None => (jar, StatusCode::NO_CONTENT).into_response(),
        },
        Err(error) => {
            tracing::debug!(error = %error, "Rejecting malformed POST body");
            let status = error.http_status();
            let body = Json(RpcResponse::from_rpc_error(None, &error));
            (jar, (status, body)).into_response()
        }
    }
}

/// `GET /health`.
pub(crate) async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `GET /ready`.
pub(crate) async fn readiness_check(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let session_count = state.store.count().await;
    Json(serde_json::json!({
        "status": "ready",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": session_count,
        "clients": state.clients.client_count()
    }))
}

/// `GET /sessions` (diagnostics).
pub(crate) async fn handle_sessions_list(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let sessions = state.store.list().await;
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions
    }))
}
