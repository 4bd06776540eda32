//! MCP Runtime - Entry Point
//!
//! Runs the server over stdio, SSE, or WebSocket.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_runtime::providers::memory::StaticToolProvider;
use mcp_runtime::server::{McpServer, ServerOptions};
use mcp_runtime::tools::builtin::EchoTool;
use mcp_runtime::tools::middleware::{TracingMiddleware, TruncateOutput};

#[derive(Parser, Debug)]
#[command(name = "mcp-runtime")]
#[command(about = "Model Context Protocol server runtime")]
#[command(version)]
struct Cli {
    /// Transport mode: stdio, sse, or ws
    #[arg(long, default_value = "stdio")]
    transport: Transport,

    /// Listen port (sse and ws transports)
    #[arg(long, default_value = "8000", env = "PORT")]
    port: u16,

    /// Reject requests sent before the initialize handshake completes
    #[arg(long)]
    strict_init: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Transport {
    /// Standard input/output (line-delimited JSON)
    #[default]
    Stdio,
    /// HTTP with Server-Sent Events
    Sse,
    /// WebSocket
    Ws,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cli.transport,
        "Starting MCP runtime"
    );

    let options = ServerOptions { strict_initialization: cli.strict_init, ..Default::default() };
    let server = McpServer::builder()
        .options(options)
        .tool_provider(Arc::new(StaticToolProvider::new(vec![Arc::new(EchoTool)])))
        .middleware(Arc::new(TracingMiddleware))
        .middleware(Arc::new(TruncateOutput::new()))
        .build();

    match cli.transport {
        Transport::Stdio => server.run_stdio().await?,
        Transport::Sse => server.run_sse(cli.port).await?,
        Transport::Ws => server.run_ws(cli.port).await?,
    }

    Ok(())
}
