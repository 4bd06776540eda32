//! Server assembly.
//!
//! `McpServer` bundles the provider registry, tool pipeline, and dispatcher,
//! and runs them over one of the three transports.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::protocol::messages::Implementation;
use crate::providers::registry::ProviderRegistry;
use crate::providers::{PromptProvider, ResourceProvider, SamplingProvider, ToolProvider};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::tools::middleware::ToolMiddleware;
use crate::tools::pipeline::ToolPipeline;
use crate::transport::sse::SseTransport;
use crate::transport::stdio::StdioTransport;
use crate::transport::ws::WsTransport;
use crate::transport::Transport;

/// Server identity and behavior switches.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Name reported in `initialize`.
    pub name: String,
    /// Version reported in `initialize`.
    pub version: String,
    /// Reject non-initialize, non-ping requests before the handshake.
    pub strict_initialization: bool,
    /// Resolve dashed and underscored spellings to the same tool.
    pub normalize_names: bool,
    /// Deadline applied to every request.
    pub request_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            strict_initialization: false,
            normalize_names: false,
            request_timeout: None,
        }
    }
}

/// MCP server: providers + pipeline + dispatcher, ready to run on a
/// transport.
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
}

impl McpServer {
    /// Start building a server.
    #[must_use]
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::default()
    }

    /// The dispatcher, for embedding the server in a custom transport.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Run on stdio until EOF or ctrl-c.
    pub async fn run_stdio(&self) -> anyhow::Result<()> {
        tracing::info!("Starting MCP server in stdio mode");
        let transport = StdioTransport::new(self.dispatcher());
        self.run(transport).await
    }

    /// Run the SSE transport until ctrl-c.
    pub async fn run_sse(&self, port: u16) -> anyhow::Result<()> {
        tracing::info!(port, "Starting MCP server in SSE mode");
        let transport = SseTransport::new(self.dispatcher(), port);
        self.run(transport).await
    }

    /// Run the WebSocket transport until ctrl-c.
    pub async fn run_ws(&self, port: u16) -> anyhow::Result<()> {
        tracing::info!(port, "Starting MCP server in WebSocket mode");
        let transport = WsTransport::new(self.dispatcher(), port);
        self.run(transport).await
    }

    async fn run<T: Transport>(&self, mut transport: T) -> anyhow::Result<()> {
        let store = Arc::new(InMemorySessionStore::new());
        store.start_cleanup_task();
        transport.set_session_store(store as Arc<dyn SessionStore>);

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            trigger.cancel();
        });

        transport.listen(shutdown).await
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer").finish()
    }
}

/// Collects providers and middleware before the registry is frozen behind
/// the dispatcher.
#[derive(Default)]
pub struct McpServerBuilder {
    options: ServerOptions,
    tools: Vec<Arc<dyn ToolProvider>>,
    prompts: Vec<Arc<dyn PromptProvider>>,
    resources: Vec<Arc<dyn ResourceProvider>>,
    middlewares: Vec<Arc<dyn ToolMiddleware>>,
    sampling: Option<Arc<dyn SamplingProvider>>,
}

impl McpServerBuilder {
    /// Apply server options.
    #[must_use]
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a tool provider; registration order is resolution order.
    #[must_use]
    pub fn tool_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.tools.push(provider);
        self
    }

    /// Register a prompt provider.
    #[must_use]
    pub fn prompt_provider(mut self, provider: Arc<dyn PromptProvider>) -> Self {
        self.prompts.push(provider);
        self
    }

    /// Register a resource provider.
    #[must_use]
    pub fn resource_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.resources.push(provider);
        self
    }

    /// Wire a sampling provider for `sampling/createMessage`.
    #[must_use]
    pub fn sampling_provider(mut self, provider: Arc<dyn SamplingProvider>) -> Self {
        self.sampling = Some(provider);
        self
    }

    /// Append a tool middleware; configuration order is execution order.
    #[must_use]
    pub fn middleware(mut self, middleware: Arc<dyn ToolMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Freeze the registry and build the server.
    #[must_use]
    pub fn build(self) -> McpServer {
        let mut registry =
            ProviderRegistry::new().with_name_normalization(self.options.normalize_names);
        for provider in self.tools {
            registry.register_tool_provider(provider);
        }
        for provider in self.prompts {
            registry.register_prompt_provider(provider);
        }
        for provider in self.resources {
            registry.register_resource_provider(provider);
        }

        let mut pipeline = ToolPipeline::new();
        for middleware in self.middlewares {
            pipeline.push(middleware);
        }

        let server_info =
            Implementation { name: self.options.name.clone(), version: self.options.version.clone() };
        let mut dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(pipeline), server_info)
            .with_strict_initialization(self.options.strict_initialization);
        if let Some(timeout) = self.options.request_timeout {
            dispatcher = dispatcher.with_request_timeout(timeout);
        }
        if let Some(sampling) = self.sampling {
            dispatcher = dispatcher.with_sampling_provider(sampling);
        }

        McpServer { dispatcher: Arc::new(dispatcher) }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
    tracing::info!("Received shutdown signal");
}
