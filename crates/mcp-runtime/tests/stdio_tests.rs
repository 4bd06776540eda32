//! Tests for the stdio transport: line framing, batch frames, parse errors,
//! and EOF shutdown.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio_util::sync::CancellationToken;

use mcp_runtime::providers::memory::StaticToolProvider;
use mcp_runtime::server::McpServer;
use mcp_runtime::tools::builtin::EchoTool;
use mcp_runtime::transport::stdio::StdioTransport;

struct StdioHarness {
    stdin: DuplexStream,
    stdout: BufReader<DuplexStream>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl StdioHarness {
    fn start() -> Self {
        let dispatcher = McpServer::builder()
            .tool_provider(Arc::new(StaticToolProvider::new(vec![Arc::new(EchoTool)])))
            .build()
            .dispatcher();

        let (stdin, server_stdin) = tokio::io::duplex(4096);
        let (server_stdout, stdout) = tokio::io::duplex(4096);
        let shutdown = CancellationToken::new();

        let transport = Arc::new(StdioTransport::new(dispatcher));
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            transport.run_with(server_stdin, server_stdout, token).await
        });

        Self { stdin, stdout: BufReader::new(stdout), shutdown, task }
    }

    async fn send_line(&mut self, line: &str) {
        self.stdin.write_all(line.as_bytes()).await.unwrap();
        self.stdin.write_all(b"\n").await.unwrap();
        self.stdin.flush().await.unwrap();
    }

    async fn read_json(&mut self) -> serde_json::Value {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.stdout.read_line(&mut line))
            .await
            .expect("response within deadline")
            .unwrap();
        serde_json::from_str(line.trim()).expect("one JSON value per line")
    }
}

/// S1: one request in, one response out, same id.
#[tokio::test]
async fn test_single_request_roundtrip() {
    let mut harness = StdioHarness::start();

    harness.send_line(r#"{"jsonrpc":"2.0","id":"1","method":"ping"}"#).await;
    let response = harness.read_json().await;

    assert_eq!(response, json!({"jsonrpc":"2.0","id":"1","result":{}}));
}

/// S2: a batch is one line in, one array line out, notification omitted.
#[tokio::test]
async fn test_batch_frame() {
    let mut harness = StdioHarness::start();

    harness
        .send_line(
            r#"[{"jsonrpc":"2.0","id":"1","method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"},{"jsonrpc":"2.0","id":"2","method":"ping"}]"#,
        )
        .await;
    let response = harness.read_json().await;

    let entries = response.as_array().expect("batch response is an array");
    assert_eq!(entries.len(), 2);
    let mut ids: Vec<&str> =
        entries.iter().map(|e| e["id"].as_str().unwrap()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["1", "2"]);
    for entry in entries {
        assert_eq!(entry["result"], json!({}));
    }
}

#[tokio::test]
async fn test_tool_call_over_stdio() {
    let mut harness = StdioHarness::start();

    harness
        .send_line(
            r#"{"jsonrpc":"2.0","id":"7","method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
        )
        .await;
    let response = harness.read_json().await;

    assert_eq!(response["result"]["content"][0]["text"], "hi");
    assert_eq!(response["result"]["isError"], false);
}

#[tokio::test]
async fn test_malformed_line_is_parse_error() {
    let mut harness = StdioHarness::start();

    harness.send_line("{this is not json").await;
    let response = harness.read_json().await;

    assert_eq!(response["error"]["code"], -32700);
    assert!(response.get("id").is_none_or(serde_json::Value::is_null));
}

/// A notification gets no response; the next request's response is the next
/// line on the wire.
#[tokio::test]
async fn test_notification_produces_no_line() {
    let mut harness = StdioHarness::start();

    harness.send_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
    harness.send_line(r#"{"jsonrpc":"2.0","id":"after","method":"ping"}"#).await;

    let response = harness.read_json().await;
    assert_eq!(response["id"], "after");
}

#[tokio::test]
async fn test_eof_stops_the_loop() {
    let harness = StdioHarness::start();

    drop(harness.stdin);
    let result = tokio::time::timeout(Duration::from_secs(5), harness.task)
        .await
        .expect("loop exits on EOF")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_shutdown_token_stops_the_loop() {
    let harness = StdioHarness::start();

    harness.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), harness.task)
        .await
        .expect("loop exits on shutdown")
        .unwrap();
    assert!(result.is_ok());
}
