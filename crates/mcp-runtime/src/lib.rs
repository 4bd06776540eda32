//! MCP Runtime
//!
//! A Model Context Protocol (MCP) runtime: a JSON-RPC 2.0 engine that lets a
//! host expose capability providers (tools, prompts, resources) to clients
//! over interchangeable transports.
//!
//! # Features
//!
//! - **Three transports**: line-delimited stdio, HTTP+SSE with cookie-bound
//!   sessions, and WebSocket with ping/pong liveness
//! - **Provider registry**: ordered prompt/resource/tool providers with
//!   first-wins resolution and composite pagination cursors
//! - **Tool pipeline**: JSON Schema argument validation, an ordered
//!   middleware chain, and typed content shaping
//! - **Cancellation**: `notifications/cancelled` reaches in-flight requests
//!   through per-request tokens
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mcp_runtime::providers::memory::StaticToolProvider;
//! use mcp_runtime::server::McpServer;
//! use mcp_runtime::tools::builtin::EchoTool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::builder()
//!         .tool_provider(Arc::new(StaticToolProvider::new(vec![Arc::new(EchoTool)])))
//!         .build();
//!
//!     server.run_stdio().await
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod providers;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

pub use context::RequestContext;
pub use error::{ProviderError, RpcError, ToolError};
pub use server::{McpServer, ServerOptions};
pub use session::{Session, SessionId, SessionStore};
