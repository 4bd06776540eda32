//! Built-in tools.

use async_trait::async_trait;
use serde_json::{json, Map};

use crate::context::RequestContext;
use crate::error::ToolError;
use crate::tools::{Tool, ToolOutput};

/// Echoes its `message` argument back as text. Ships with the binary so a
/// fresh server has something to call, and anchors the integration tests.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the provided message back to the caller."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text to echo back"
                }
            },
            "required": ["message"]
        })
    }

    async fn call(
        &self,
        _ctx: &RequestContext,
        arguments: Map<String, serde_json::Value>,
    ) -> Result<ToolOutput, ToolError> {
        let message = arguments
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::validation("message", "must be a string"))?;

        Ok(ToolOutput::Text(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionId};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> RequestContext {
        RequestContext::new(
            Arc::new(Session::new(SessionId::generate())),
            CancellationToken::new(),
            Some("1".into()),
        )
    }

    #[tokio::test]
    async fn test_echo_returns_message() {
        let ctx = test_ctx();
        let mut args = Map::new();
        args.insert("message".into(), json!("hi"));

        let output = EchoTool.call(&ctx, args).await.unwrap();
        match output {
            ToolOutput::Text(text) => assert_eq!(text, "hi"),
            other => panic!("expected text output, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_echo_rejects_non_string() {
        let ctx = test_ctx();
        let mut args = Map::new();
        args.insert("message".into(), json!(7));

        let err = EchoTool.call(&ctx, args).await.unwrap_err();
        assert!(err.to_user_message().contains("message"));
    }
}
