//! Request dispatcher.
//!
//! Routes validated requests to their handlers, expands batches with
//! per-entry isolation, and wires cancellation tokens through every
//! handler's context. Protocol errors land in `Response.error`; a handler
//! panic is caught at the task boundary and becomes an Internal error.

pub mod cancel;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;

use crate::config;
use crate::context::RequestContext;
use crate::error::RpcError;
use crate::protocol::messages::{
    CallToolParams, CancelledParams, CreateMessageParams, EmptyCapability, GetPromptParams,
    Implementation, InitializeParams, InitializeResult, ListParams, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, PromptsCapability,
    ResourceParams, ResourcesCapability, ServerCapabilities, ToolsCapability,
};
use crate::protocol::{IncomingMessage, OutgoingMessage, Request, Response};
use crate::providers::registry::ProviderRegistry;
use crate::providers::SamplingProvider;
use crate::session::{InitState, Negotiated, Session, SessionId};
use crate::tools::pipeline::ToolPipeline;
use cancel::CancelRegistry;

/// Sink for server-initiated notifications, implemented by each transport.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification to every client of the session.
    async fn notify(&self, session: &SessionId, notification: Request);
}

/// Routes requests and notifications to handlers.
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    pipeline: Arc<ToolPipeline>,
    pending: CancelRegistry,
    sampling: Option<Arc<dyn SamplingProvider>>,
    sink: std::sync::RwLock<Option<Arc<dyn NotificationSink>>>,
    server_info: Implementation,
    strict_initialization: bool,
    request_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher over a provider registry and tool pipeline.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        pipeline: Arc<ToolPipeline>,
        server_info: Implementation,
    ) -> Self {
        Self {
            registry,
            pipeline,
            pending: CancelRegistry::new(),
            sampling: None,
            sink: std::sync::RwLock::new(None),
            server_info,
            strict_initialization: false,
            request_timeout: None,
        }
    }

    /// Reject non-initialize, non-ping requests before the handshake
    /// completes.
    #[must_use]
    pub const fn with_strict_initialization(mut self, strict: bool) -> Self {
        self.strict_initialization = strict;
        self
    }

    /// Apply a deadline to every request.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Wire a sampling provider for `sampling/createMessage`.
    #[must_use]
    pub fn with_sampling_provider(mut self, provider: Arc<dyn SamplingProvider>) -> Self {
        self.sampling = Some(provider);
        self
    }

    /// Install the transport's notification sink. Called by the transport
    /// before it starts listening.
    pub fn set_notification_sink(&self, sink: Arc<dyn NotificationSink>) {
        *self.sink.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sink);
    }

    /// The capabilities this server advertises, derived from what is
    /// registered.
    #[must_use]
    pub fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            prompts: self
                .registry
                .has_prompts()
                .then(|| PromptsCapability { list_changed: Some(false) }),
            resources: self.registry.has_resources().then(|| ResourcesCapability {
                subscribe: Some(true),
                list_changed: Some(false),
            }),
            tools: self
                .registry
                .has_tools()
                .then(|| ToolsCapability { list_changed: Some(false) }),
            sampling: self.sampling.as_ref().map(|_| EmptyCapability {}),
            logging: None,
        }
    }

    /// Handle one inbound frame; `None` means nothing goes back on the wire
    /// (notifications, or a batch of only notifications).
    pub async fn dispatch(
        &self,
        session: &Arc<Session>,
        message: IncomingMessage,
    ) -> Option<OutgoingMessage> {
        match message {
            IncomingMessage::Single(req) if req.is_notification() => {
                self.handle_notification(session, req).await;
                None
            }
            IncomingMessage::Single(req) => {
                Some(OutgoingMessage::Single(self.handle_request(session, req).await))
            }
            IncomingMessage::Batch(requests) => {
                let responses = self.handle_batch(session, requests).await;
                if responses.is_empty() {
                    None
                } else {
                    Some(OutgoingMessage::Batch(responses))
                }
            }
        }
    }

    /// Handle one identified request. Always produces a response; handler
    /// panics surface as Internal errors.
    pub async fn handle_request(&self, session: &Arc<Session>, request: Request) -> Response {
        let id = request.id.clone();

        let work = AssertUnwindSafe(self.handle_request_inner(session, request)).catch_unwind();
        match work.await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!("Request handler panicked");
                Response::from_rpc_error(id, &RpcError::internal("handler panicked"))
            }
        }
    }

    /// Handle one notification. Never produces a response; errors are
    /// logged.
    pub async fn handle_notification(&self, session: &Arc<Session>, request: Request) {
        session.touch().await;
        tracing::debug!(method = %request.method, session_id = %session.id, "Handling notification");

        match request.method.as_str() {
            "notifications/initialized" | "initialized" => {
                session.set_init_state(InitState::Initialized).await;
            }
            "notifications/cancelled" => match request.params_as::<CancelledParams>() {
                Ok(params) => {
                    self.pending.cancel(
                        &session.id,
                        &params.request_id,
                        params.reason.as_deref(),
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed cancellation notification");
                }
            },
            other => {
                tracing::debug!(method = %other, "Ignoring unknown notification");
            }
        }
    }

    /// Expand a batch: entries run concurrently, notifications produce no
    /// entry, one entry's failure never touches its siblings. Response order
    /// is not the request order; clients match by id.
    pub async fn handle_batch(
        &self,
        session: &Arc<Session>,
        requests: Vec<Request>,
    ) -> Vec<Response> {
        let entries = requests.into_iter().map(|request| async move {
            if request.is_notification() {
                self.handle_notification(session, request).await;
                None
            } else {
                Some(self.handle_request(session, request).await)
            }
        });

        futures::future::join_all(entries).await.into_iter().flatten().collect()
    }

    async fn handle_request_inner(&self, session: &Arc<Session>, request: Request) -> Response {
        session.touch().await;
        tracing::debug!(method = %request.method, session_id = %session.id, "Handling request");

        let id = request.id.clone();

        if self.strict_initialization
            && !matches!(request.method.as_str(), "initialize" | "ping")
            && session.init_state().await != InitState::Initialized
        {
            return Response::from_rpc_error(
                id,
                &RpcError::invalid_request("session not initialized"),
            );
        }

        // initialize is exempt from cancellation, so it never registers.
        let pending = match &id {
            Some(request_id) if request.method != "initialize" => {
                Some(self.pending.register(&session.id, request_id))
            }
            _ => None,
        };
        let token = pending.as_ref().map_or_else(Default::default, cancel::PendingRequest::token);
        let ctx = RequestContext::new(Arc::clone(session), token.clone(), id.clone());

        let work = async {
            tokio::select! {
                () = token.cancelled() => Err(RpcError::internal("cancelled")),
                outcome = self.route(&ctx, &request) => outcome,
            }
        };
        let outcome = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
                Err(RpcError::Timeout(format!("request exceeded {}ms", limit.as_millis())))
            }),
            None => work.await,
        };
        drop(pending);

        match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => {
                tracing::debug!(method = %request.method, error = %error, "Request failed");
                Response::from_rpc_error(id, &error)
            }
        }
    }

    async fn route(
        &self,
        ctx: &RequestContext,
        request: &Request,
    ) -> Result<serde_json::Value, RpcError> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(ctx, request.params_as()?).await,
            "notifications/initialized" | "initialized" => {
                // Tolerated as an identified request; clients disagree here.
                ctx.session.set_init_state(InitState::Initialized).await;
                Ok(json!({}))
            }
            "ping" => Ok(json!({})),
            "prompts/list" => {
                let params: ListParams = request.params_as()?;
                let listing = self.registry.list_prompts(params.cursor.as_deref()).await?;
                to_result(&ListPromptsResult {
                    prompts: listing.items,
                    next_cursor: listing.next_cursor,
                })
            }
            "prompts/get" => {
                let params: GetPromptParams = request.params_as()?;
                let result =
                    self.registry.get_prompt(ctx, &params.name, &params.arguments).await?;
                to_result(&result)
            }
            "resources/list" => {
                let params: ListParams = request.params_as()?;
                let listing = self.registry.list_resources(params.cursor.as_deref()).await?;
                to_result(&ListResourcesResult {
                    resources: listing.items,
                    next_cursor: listing.next_cursor,
                })
            }
            "resources/read" => {
                let params: ResourceParams = request.params_as()?;
                let result = self.registry.read_resource(ctx, &params.uri).await?;
                to_result(&result)
            }
            "resources/templates/list" => {
                let params: ListParams = request.params_as()?;
                let listing =
                    self.registry.list_resource_templates(params.cursor.as_deref()).await?;
                to_result(&ListResourceTemplatesResult {
                    resource_templates: listing.items,
                    next_cursor: listing.next_cursor,
                })
            }
            "resources/subscribe" => {
                let params: ResourceParams = request.params_as()?;
                self.handle_subscribe(ctx, params).await
            }
            "tools/list" => {
                let params: ListParams = request.params_as()?;
                let listing = self.registry.list_tools(params.cursor.as_deref()).await?;
                to_result(&ListToolsResult { tools: listing.items, next_cursor: listing.next_cursor })
            }
            "tools/call" => {
                let params: CallToolParams = request.params_as()?;
                let tool = self.registry.resolve_tool(&params.name).await?;
                let result = self.pipeline.execute(ctx, tool.as_ref(), params.arguments).await?;
                to_result(&result)
            }
            "sampling/createMessage" => {
                let params: CreateMessageParams = request.params_as()?;
                match &self.sampling {
                    Some(provider) => {
                        let result = provider
                            .create_message(ctx, params)
                            .await
                            .map_err(RpcError::from)?;
                        to_result(&result)
                    }
                    None => Err(RpcError::method_not_found("sampling/createMessage")),
                }
            }
            "notifications/cancelled" => {
                // Same tolerance as initialized: a client that attaches an id
                // still gets the cancellation applied.
                let params: CancelledParams = request.params_as()?;
                self.pending.cancel(&ctx.session.id, &params.request_id, params.reason.as_deref());
                Ok(json!({}))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }

    async fn handle_initialize(
        &self,
        ctx: &RequestContext,
        params: InitializeParams,
    ) -> Result<serde_json::Value, RpcError> {
        let version = params
            .protocol_version
            .as_deref()
            .filter(|v| config::protocol::SUPPORTED_VERSIONS.contains(v))
            .unwrap_or(config::protocol::VERSION)
            .to_string();

        tracing::info!(
            session_id = %ctx.session.id,
            protocol_version = %version,
            client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            "Initializing session"
        );

        // Re-initialize replaces the negotiated facts but keeps the session.
        ctx.session
            .set_negotiated(Negotiated {
                protocol_version: Some(version.clone()),
                client_info: params.client_info,
                client_capabilities: params.capabilities,
            })
            .await;
        if ctx.session.init_state().await == InitState::Uninitialized {
            ctx.session.set_init_state(InitState::Initializing).await;
        }

        to_result(&InitializeResult {
            protocol_version: version,
            capabilities: self.capabilities(),
            server_info: self.server_info.clone(),
        })
    }

    async fn handle_subscribe(
        &self,
        ctx: &RequestContext,
        params: ResourceParams,
    ) -> Result<serde_json::Value, RpcError> {
        let mut updates = self.registry.subscribe_resource(&params.uri).await?;

        let sink = self
            .sink
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if sink.is_none() {
            tracing::warn!(uri = %params.uri, "Subscription accepted but no notification sink is wired");
        }

        let session_id = ctx.session.id.clone();
        let uri = params.uri.clone();
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                if let Some(sink) = &sink {
                    let notification = Request::notification(
                        "notifications/resources/updated",
                        Some(json!({"uri": update.uri})),
                    );
                    sink.notify(&session_id, notification).await;
                }
            }
            tracing::debug!(uri = %uri, "Resource subscription closed");
        });

        Ok(json!({}))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("server_info", &self.server_info)
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal(e.to_string()))
}
