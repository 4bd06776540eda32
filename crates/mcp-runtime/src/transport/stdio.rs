//! Stdio transport.
//!
//! One JSON value per line in each direction. A single session lives for the
//! process lifetime, created on the first frame. The read loop is
//! single-threaded; handlers run on spawned workers so a cancellation
//! notification can interleave with a slow request, and all writes are
//! serialized through one writer task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::dispatch::{Dispatcher, NotificationSink};
use crate::error::RpcError;
use crate::protocol::{codec, Request, Response};
use crate::session::{InMemorySessionStore, Session, SessionId, SessionStore};
use crate::transport::{encode_or_internal, Transport, TransportInfo, TransportKind};

/// Line-delimited transport over a byte pair, stdin/stdout in production.
pub struct StdioTransport {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn SessionStore>,
    outbox: std::sync::RwLock<Option<mpsc::Sender<String>>>,
    shutdown: CancellationToken,
}

impl StdioTransport {
    /// Create a stdio transport over a dispatcher.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            store: Arc::new(InMemorySessionStore::new()),
            outbox: std::sync::RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run the duplex loop over arbitrary byte streams. Tests drive this
    /// with `tokio::io::duplex`.
    pub async fn run_with<R, W>(
        &self,
        reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<String>(config::transport::CLIENT_OUTBOX_CAPACITY);
        *self.outbox.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(tx.clone());
        self.dispatcher.set_notification_sink(Arc::new(StdioSink { outbox: tx.clone() }));

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(frame) = rx.recv().await {
                if writer.write_all(frame.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    tracing::error!("Stdio write failed, stopping writer");
                    break;
                }
            }
        });

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut session: Option<Arc<Session>> = None;

        tracing::info!("Stdio transport ready, waiting for requests");

        loop {
            line.clear();
            let bytes_read = tokio::select! {
                () = shutdown.cancelled() => break,
                read = reader.read_line(&mut line) => read?,
            };

            if bytes_read == 0 {
                tracing::info!("Stdin closed, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            // One session per process lifetime, created on first use.
            let session = match &session {
                Some(existing) => Arc::clone(existing),
                None => {
                    let created = self.store.create().await;
                    session = Some(Arc::clone(&created));
                    created
                }
            };

            match codec::parse_message(trimmed.as_bytes()) {
                Ok(message) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if let Some(outgoing) = dispatcher.dispatch(&session, message).await {
                            let frame = encode_or_internal(&outgoing);
                            if tx.send(frame).await.is_err() {
                                tracing::error!("Stdio writer gone, dropping response");
                            }
                        }
                    });
                }
                Err(error) => {
                    tracing::debug!(error = %error, "Rejecting malformed stdio frame");
                    let response = Response::from_rpc_error(None, &error);
                    let frame = serde_json::to_string(&response)?;
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }

        *self.outbox.write().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        drop(tx);
        // The dispatcher's sink still holds a sender; stop the writer once
        // the loop is done rather than waiting for it to drain forever.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        writer_task.abort();
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn listen(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let merged = CancellationToken::new();
        let external = shutdown;
        let local = self.shutdown.clone();
        let fire = merged.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = external.cancelled() => {},
                () = local.cancelled() => {},
            }
            fire.cancel();
        });

        self.run_with(tokio::io::stdin(), tokio::io::stdout(), merged).await
    }

    async fn send(&self, _session: &SessionId, message: serde_json::Value) -> Result<(), RpcError> {
        let outbox = self
            .outbox
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let Some(outbox) = outbox else {
            return Err(RpcError::Transport("stdio transport not listening".into()));
        };

        let frame = serde_json::to_string(&message)
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        if outbox.try_send(frame).is_err() {
            tracing::warn!("Stdio outbox full, dropping server message");
        }
        Ok(())
    }

    async fn close(&self) {
        self.shutdown.cancel();
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            kind: TransportKind::Stdio,
            description: "line-delimited JSON over stdin/stdout".into(),
        }
    }

    fn set_session_store(&mut self, store: Arc<dyn SessionStore>) {
        self.store = store;
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport").finish()
    }
}

/// Sink for server-initiated traffic on the single stdio session.
struct StdioSink {
    outbox: mpsc::Sender<String>,
}

#[async_trait]
impl NotificationSink for StdioSink {
    async fn notify(&self, _session: &SessionId, notification: Request) {
        match serde_json::to_string(&notification) {
            Ok(frame) => {
                if self.outbox.try_send(frame).is_err() {
                    tracing::warn!("Stdio outbox full, dropping notification");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize notification"),
        }
    }
}
