//! Tests for request dispatch: routing, batches, cancellation, and the
//! initialization handshake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map};

use mcp_runtime::context::RequestContext;
use mcp_runtime::dispatch::Dispatcher;
use mcp_runtime::error::ToolError;
use mcp_runtime::protocol::{IncomingMessage, OutgoingMessage, Request, Response};
use mcp_runtime::providers::memory::{StaticPromptProvider, StaticResourceProvider, StaticToolProvider};
use mcp_runtime::protocol::messages::{PromptDescriptor, ResourceDescriptor};
use mcp_runtime::server::{McpServer, ServerOptions};
use mcp_runtime::session::{Session, SessionId};
use mcp_runtime::tools::builtin::EchoTool;
use mcp_runtime::tools::{Tool, ToolOutput};

/// Sleeps until cancelled; used by the cancellation scenarios.
struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Waits a long time."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn call(
        &self,
        ctx: &RequestContext,
        _arguments: Map<String, serde_json::Value>,
    ) -> Result<ToolOutput, ToolError> {
        tokio::select! {
            () = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            () = tokio::time::sleep(Duration::from_secs(30)) => {
                Ok(ToolOutput::Text("done".into()))
            }
        }
    }
}

fn echo_dispatcher() -> Arc<Dispatcher> {
    McpServer::builder()
        .tool_provider(Arc::new(StaticToolProvider::new(vec![
            Arc::new(EchoTool),
            Arc::new(SlowTool),
        ])))
        .build()
        .dispatcher()
}

fn new_session() -> Arc<Session> {
    Arc::new(Session::new(SessionId::generate()))
}

fn request(raw: serde_json::Value) -> Request {
    serde_json::from_value(raw).expect("valid request fixture")
}

// =============================================================================
// Single Request Routing
// =============================================================================

/// S1: ping returns an empty object with the id echoed.
#[tokio::test]
async fn test_ping_roundtrip() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let req = request(json!({"jsonrpc":"2.0","id":"1","method":"ping"}));
    let response = dispatcher.handle_request(&session, req).await;

    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(wire, json!({"jsonrpc":"2.0","id":"1","result":{}}));
}

/// ping is idempotent.
#[tokio::test]
async fn test_ping_idempotent() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    for i in 0..3 {
        let req = request(json!({"jsonrpc":"2.0","id":i,"method":"ping"}));
        let response = dispatcher.handle_request(&session, req).await;
        assert_eq!(response.result, Some(json!({})));
    }
}

#[tokio::test]
async fn test_unknown_method_not_found() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let req = request(json!({"jsonrpc":"2.0","id":"1","method":"bogus/method"}));
    let response = dispatcher.handle_request(&session, req).await;

    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("bogus/method"));
}

#[tokio::test]
async fn test_sampling_without_provider_is_method_not_found() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let req = request(json!({
        "jsonrpc":"2.0","id":"1","method":"sampling/createMessage",
        "params":{"messages":[{"role":"user","content":{"type":"text","text":"hi"}}]}
    }));
    let response = dispatcher.handle_request(&session, req).await;
    assert_eq!(response.error.unwrap().code, -32601);
}

// =============================================================================
// Initialization Handshake
// =============================================================================

#[tokio::test]
async fn test_initialize_reports_capabilities() {
    let dispatcher = McpServer::builder()
        .tool_provider(Arc::new(StaticToolProvider::new(vec![Arc::new(EchoTool)])))
        .prompt_provider(Arc::new(StaticPromptProvider::new().with_prompt(
            PromptDescriptor { name: "greet".into(), description: None, arguments: vec![] },
            "Hello, {who}!",
        )))
        .build()
        .dispatcher();
    let session = new_session();

    let req = request(json!({
        "jsonrpc":"2.0","id":"1","method":"initialize",
        "params":{
            "protocolVersion":"2024-11-05",
            "capabilities":{},
            "clientInfo":{"name":"test-client","version":"0.0.1"}
        }
    }));
    let response = dispatcher.handle_request(&session, req).await;
    let result = response.result.unwrap();

    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert!(result["capabilities"]["tools"].is_object());
    assert!(result["capabilities"]["prompts"].is_object());
    assert!(result["capabilities"].get("resources").is_none());
    assert_eq!(result["serverInfo"]["name"], "mcp-runtime");
}

/// Re-initialize returns the same shape and keeps the session.
#[tokio::test]
async fn test_reinitialize_keeps_session() {
    let dispatcher = echo_dispatcher();
    let session = new_session();
    let original_id = session.id.clone();

    for i in 0..2 {
        let req = request(json!({
            "jsonrpc":"2.0","id":i,"method":"initialize",
            "params":{"protocolVersion":"2024-11-05"}
        }));
        let response = dispatcher.handle_request(&session, req).await;
        assert!(response.result.is_some());
    }

    assert_eq!(session.id, original_id);
}

#[tokio::test]
async fn test_unsupported_protocol_version_falls_back() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let req = request(json!({
        "jsonrpc":"2.0","id":"1","method":"initialize",
        "params":{"protocolVersion":"1999-01-01"}
    }));
    let response = dispatcher.handle_request(&session, req).await;
    assert_eq!(response.result.unwrap()["protocolVersion"], "2024-11-05");
}

#[tokio::test]
async fn test_strict_initialization_rejects_early_requests() {
    let dispatcher = McpServer::builder()
        .options(ServerOptions { strict_initialization: true, ..Default::default() })
        .tool_provider(Arc::new(StaticToolProvider::new(vec![Arc::new(EchoTool)])))
        .build()
        .dispatcher();
    let session = new_session();

    // tools/list before the handshake is rejected.
    let req = request(json!({"jsonrpc":"2.0","id":"1","method":"tools/list"}));
    let response = dispatcher.handle_request(&session, req).await;
    assert_eq!(response.error.unwrap().code, -32600);

    // ping is always allowed.
    let req = request(json!({"jsonrpc":"2.0","id":"2","method":"ping"}));
    assert!(dispatcher.handle_request(&session, req).await.result.is_some());

    // Complete the handshake, then the same request succeeds.
    let req = request(json!({"jsonrpc":"2.0","id":"3","method":"initialize","params":{}}));
    assert!(dispatcher.handle_request(&session, req).await.result.is_some());
    dispatcher
        .handle_notification(
            &session,
            request(json!({"jsonrpc":"2.0","method":"notifications/initialized"})),
        )
        .await;

    let req = request(json!({"jsonrpc":"2.0","id":"4","method":"tools/list"}));
    assert!(dispatcher.handle_request(&session, req).await.result.is_some());
}

// =============================================================================
// Tool Calls
// =============================================================================

/// S3: a registered tool call returns shaped content.
#[tokio::test]
async fn test_tool_call_success() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let req = request(json!({
        "jsonrpc":"2.0","id":"7","method":"tools/call",
        "params":{"name":"echo","arguments":{"message":"hi"}}
    }));
    let response = dispatcher.handle_request(&session, req).await;

    let result = response.result.unwrap();
    assert_eq!(result, json!({"content":[{"type":"text","text":"hi"}],"isError":false}));
}

/// S4: an unknown tool name maps to the reserved server range.
#[tokio::test]
async fn test_tool_call_unknown_name() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let req = request(json!({
        "jsonrpc":"2.0","id":"8","method":"tools/call",
        "params":{"name":"nope","arguments":{}}
    }));
    let response = dispatcher.handle_request(&session, req).await;

    assert!(response.result.is_none());
    let error = response.error.unwrap();
    assert_eq!(error.code, -32000);
    assert!(error.message.contains("tool not found"));
}

#[tokio::test]
async fn test_tool_call_schema_violation() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let req = request(json!({
        "jsonrpc":"2.0","id":"9","method":"tools/call",
        "params":{"name":"echo","arguments":{"message":5}}
    }));
    let response = dispatcher.handle_request(&session, req).await;
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_tools_list() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let req = request(json!({"jsonrpc":"2.0","id":"1","method":"tools/list"}));
    let response = dispatcher.handle_request(&session, req).await;

    let result = response.result.unwrap();
    let tools = result["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0]["name"], "echo");
    assert!(tools[0]["inputSchema"].is_object());
    assert!(result.get("nextCursor").is_none());
}

// =============================================================================
// Prompts and Resources
// =============================================================================

#[tokio::test]
async fn test_prompt_get_and_list() {
    let dispatcher = McpServer::builder()
        .prompt_provider(Arc::new(StaticPromptProvider::new().with_prompt(
            PromptDescriptor {
                name: "greet".into(),
                description: Some("Greets someone.".into()),
                arguments: vec![],
            },
            "Hello, {who}!",
        )))
        .build()
        .dispatcher();
    let session = new_session();

    let req = request(json!({"jsonrpc":"2.0","id":"1","method":"prompts/list"}));
    let response = dispatcher.handle_request(&session, req).await;
    assert_eq!(response.result.unwrap()["prompts"][0]["name"], "greet");

    let req = request(json!({
        "jsonrpc":"2.0","id":"2","method":"prompts/get",
        "params":{"name":"greet","arguments":{"who":"world"}}
    }));
    let response = dispatcher.handle_request(&session, req).await;
    let result = response.result.unwrap();
    assert_eq!(result["messages"][0]["content"]["text"], "Hello, world!");

    let req = request(json!({
        "jsonrpc":"2.0","id":"3","method":"prompts/get","params":{"name":"missing"}
    }));
    let response = dispatcher.handle_request(&session, req).await;
    assert_eq!(response.error.unwrap().code, -32001);
}

#[tokio::test]
async fn test_resource_read_and_miss() {
    let dispatcher = McpServer::builder()
        .resource_provider(Arc::new(StaticResourceProvider::new().with_resource(
            ResourceDescriptor {
                uri: "mem://doc".into(),
                name: "doc".into(),
                description: None,
                mime_type: Some("text/plain".into()),
            },
            "contents here",
        )))
        .build()
        .dispatcher();
    let session = new_session();

    let req = request(json!({
        "jsonrpc":"2.0","id":"1","method":"resources/read","params":{"uri":"mem://doc"}
    }));
    let response = dispatcher.handle_request(&session, req).await;
    assert_eq!(response.result.unwrap()["contents"][0]["text"], "contents here");

    let req = request(json!({
        "jsonrpc":"2.0","id":"2","method":"resources/read","params":{"uri":"mem://other"}
    }));
    let response = dispatcher.handle_request(&session, req).await;
    assert_eq!(response.error.unwrap().code, -32002);

    let req = request(json!({"jsonrpc":"2.0","id":"3","method":"resources/templates/list"}));
    let response = dispatcher.handle_request(&session, req).await;
    assert_eq!(response.result.unwrap()["resourceTemplates"], json!([]));
}

// =============================================================================
// Batches
// =============================================================================

/// S2: batch entries answer by id; the notification produces no entry.
#[tokio::test]
async fn test_batch_with_notification() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let batch = vec![
        request(json!({"jsonrpc":"2.0","id":"1","method":"ping"})),
        request(json!({"jsonrpc":"2.0","method":"notifications/initialized"})),
        request(json!({"jsonrpc":"2.0","id":"2","method":"ping"})),
    ];
    let responses = dispatcher.handle_batch(&session, batch).await;

    assert_eq!(responses.len(), 2);
    let mut ids: Vec<String> =
        responses.iter().map(|r| r.id.clone().unwrap().key()).collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "2"]);
    for response in &responses {
        assert_eq!(response.result, Some(json!({})));
    }
}

/// Per-entry isolation: one failing entry never touches its siblings.
#[tokio::test]
async fn test_batch_entry_isolation() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let batch = vec![
        request(json!({"jsonrpc":"2.0","id":"ok","method":"ping"})),
        request(json!({
            "jsonrpc":"2.0","id":"bad","method":"tools/call",
            "params":{"name":"nope","arguments":{}}
        })),
    ];
    let responses = dispatcher.handle_batch(&session, batch).await;
    assert_eq!(responses.len(), 2);

    let ok = responses.iter().find(|r| r.id.clone().unwrap().key() == "ok").unwrap();
    let bad = responses.iter().find(|r| r.id.clone().unwrap().key() == "bad").unwrap();
    assert!(ok.result.is_some());
    assert_eq!(bad.error.as_ref().unwrap().code, -32000);
}

/// A batch of only notifications produces no response frame at all.
#[tokio::test]
async fn test_all_notification_batch_is_silent() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let message = IncomingMessage::Batch(vec![
        request(json!({"jsonrpc":"2.0","method":"notifications/initialized"})),
    ]);
    assert!(dispatcher.dispatch(&session, message).await.is_none());
}

// =============================================================================
// Cancellation
// =============================================================================

/// S5: cancelling an in-flight request produces an Internal "cancelled"
/// response; a second cancellation after completion has no effect.
#[tokio::test]
async fn test_cancellation_of_inflight_request() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let slow = request(json!({
        "jsonrpc":"2.0","id":"slow-1","method":"tools/call",
        "params":{"name":"slow","arguments":{}}
    }));
    let dispatcher_clone = Arc::clone(&dispatcher);
    let session_clone = Arc::clone(&session);
    let inflight =
        tokio::spawn(async move { dispatcher_clone.handle_request(&session_clone, slow).await });

    // Give the request time to register, then cancel it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    dispatcher
        .handle_notification(
            &session,
            request(json!({
                "jsonrpc":"2.0","method":"notifications/cancelled",
                "params":{"requestId":"slow-1","reason":"test"}
            })),
        )
        .await;

    let response = tokio::time::timeout(Duration::from_secs(5), inflight)
        .await
        .expect("cancel must complete the request promptly")
        .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, -32603);
    assert!(error.message.contains("cancelled"));

    // Late cancellation for the completed id: no observable effect.
    dispatcher
        .handle_notification(
            &session,
            request(json!({
                "jsonrpc":"2.0","method":"notifications/cancelled",
                "params":{"requestId":"slow-1"}
            })),
        )
        .await;
    let req = request(json!({"jsonrpc":"2.0","id":"after","method":"ping"}));
    assert!(dispatcher.handle_request(&session, req).await.result.is_some());
}

/// Invariant 4: cancelling an unknown id is a no-op.
#[tokio::test]
async fn test_cancellation_unknown_id_is_noop() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    dispatcher
        .handle_notification(
            &session,
            request(json!({
                "jsonrpc":"2.0","method":"notifications/cancelled",
                "params":{"requestId":"ghost"}
            })),
        )
        .await;

    let req = request(json!({"jsonrpc":"2.0","id":"1","method":"ping"}));
    assert!(dispatcher.handle_request(&session, req).await.result.is_some());
}

/// Invariant 5: initialize cannot be cancelled by its own id.
#[tokio::test]
async fn test_initialize_is_not_cancellable() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    // Cancellation racing an initialize with the same id must not suppress
    // the response.
    let init = request(json!({
        "jsonrpc":"2.0","id":"init-1","method":"initialize","params":{}
    }));
    let dispatcher_clone = Arc::clone(&dispatcher);
    let session_clone = Arc::clone(&session);
    let inflight =
        tokio::spawn(async move { dispatcher_clone.handle_request(&session_clone, init).await });

    dispatcher
        .handle_notification(
            &session,
            request(json!({
                "jsonrpc":"2.0","method":"notifications/cancelled",
                "params":{"requestId":"init-1"}
            })),
        )
        .await;

    let response = inflight.await.unwrap();
    assert!(response.result.is_some(), "initialize must complete despite cancellation");
}

// =============================================================================
// Dispatch Envelope Semantics
// =============================================================================

/// Invariants 1 and 2: identified requests get exactly one response, and
/// notifications get none.
#[tokio::test]
async fn test_notifications_never_get_responses() {
    let dispatcher = echo_dispatcher();
    let session = new_session();

    let message = IncomingMessage::Single(request(json!({
        "jsonrpc":"2.0","method":"notifications/initialized"
    })));
    assert!(dispatcher.dispatch(&session, message).await.is_none());

    let message =
        IncomingMessage::Single(request(json!({"jsonrpc":"2.0","id":"1","method":"ping"})));
    match dispatcher.dispatch(&session, message).await {
        Some(OutgoingMessage::Single(Response { id, .. })) => {
            assert_eq!(id.unwrap().key(), "1");
        }
        other => panic!("expected a single response, got {other:?}"),
    }
}
