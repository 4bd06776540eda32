//! Tool execution pipeline.
//!
//! Orders the steps of a `tools/call`: argument validation against the
//! tool's JSON Schema, the middleware chain, invocation, and result shaping.
//! Tool-reported failures become `CallToolResult { isError: true }`;
//! pipeline failures become JSON-RPC errors.

use std::sync::Arc;

use serde_json::Map;

use crate::context::RequestContext;
use crate::error::{RpcError, ToolError};
use crate::protocol::messages::CallToolResult;
use crate::tools::middleware::{Next, ToolMiddleware};
use crate::tools::Tool;

/// Configured middleware chain plus the validation step.
#[derive(Default)]
pub struct ToolPipeline {
    middlewares: Vec<Arc<dyn ToolMiddleware>>,
}

impl ToolPipeline {
    /// Create a pipeline with no middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; configuration order is execution order.
    pub fn push(&mut self, middleware: Arc<dyn ToolMiddleware>) {
        self.middlewares.push(middleware);
    }

    /// Number of configured middlewares.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// True iff no middleware is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run one tool call through validation, middleware, and shaping.
    ///
    /// # Errors
    ///
    /// `InvalidParams` when arguments violate the tool's schema, `Internal`
    /// on cancellation or a broken schema. Tool-level failures do NOT error;
    /// they come back as a result with `is_error` set.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        tool: &dyn Tool,
        arguments: Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, RpcError> {
        validate_arguments(tool, &arguments)?;

        let chain = Next { chain: &self.middlewares, tool };
        let outcome = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(RpcError::internal("cancelled")),
            outcome = chain.run(ctx, arguments) => outcome,
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(ToolError::Cancelled) => Err(RpcError::internal("cancelled")),
            Err(err) => {
                tracing::warn!(tool = %tool.name(), error = %err, "Tool reported an error");
                Ok(CallToolResult::tool_error(err.to_user_message()))
            }
        }
    }
}

impl std::fmt::Debug for ToolPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolPipeline").field("middlewares", &self.middlewares.len()).finish()
    }
}

fn validate_arguments(
    tool: &dyn Tool,
    arguments: &Map<String, serde_json::Value>,
) -> Result<(), RpcError> {
    let schema = tool.input_schema();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| RpcError::internal(format!("tool '{}' has a broken schema: {e}", tool.name())))?;

    let instance = serde_json::Value::Object(arguments.clone());
    if let Err(error) = validator.validate(&instance) {
        return Err(RpcError::invalid_params(format!(
            "arguments for '{}' are invalid: {error}",
            tool.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionId};
    use crate::tools::builtin::EchoTool;
    use crate::tools::middleware::TracingMiddleware;
    use crate::tools::ToolOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> RequestContext {
        RequestContext::new(
            Arc::new(Session::new(SessionId::generate())),
            CancellationToken::new(),
            Some("1".into()),
        )
    }

    fn echo_args(message: &str) -> Map<String, serde_json::Value> {
        let mut args = Map::new();
        args.insert("message".into(), json!(message));
        args
    }

    #[tokio::test]
    async fn test_valid_call_shapes_text() {
        let pipeline = ToolPipeline::new();
        let ctx = test_ctx();

        let result = pipeline.execute(&ctx, &EchoTool, echo_args("hi")).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(
            serde_json::to_value(&result.content).unwrap(),
            json!([{"type":"text","text":"hi"}])
        );
    }

    #[tokio::test]
    async fn test_schema_violation_is_invalid_params() {
        let pipeline = ToolPipeline::new();
        let ctx = test_ctx();

        // "message" is required by the echo schema.
        let err = pipeline.execute(&ctx, &EchoTool, Map::new()).await.unwrap_err();
        assert_eq!(err.code(), -32602);

        let mut args = Map::new();
        args.insert("message".into(), json!(42));
        let err = pipeline.execute(&ctx, &EchoTool, args).await.unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[tokio::test]
    async fn test_tool_failure_is_not_a_protocol_error() {
        struct Failing;

        #[async_trait]
        impl Tool for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            fn description(&self) -> &str {
                "Always fails."
            }
            fn input_schema(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            async fn call(
                &self,
                _ctx: &RequestContext,
                _arguments: Map<String, serde_json::Value>,
            ) -> Result<ToolOutput, ToolError> {
                Err(ToolError::internal("disk on fire"))
            }
        }

        let pipeline = ToolPipeline::new();
        let ctx = test_ctx();

        let result = pipeline.execute(&ctx, &Failing, Map::new()).await.unwrap();
        assert!(result.is_error);
        let wire = serde_json::to_value(&result).unwrap();
        assert!(wire["content"][0]["text"].as_str().unwrap().contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_cancelled_call_returns_internal() {
        struct Slow;

        #[async_trait]
        impl Tool for Slow {
            fn name(&self) -> &str {
                "slow"
            }
            fn description(&self) -> &str {
                "Sleeps until cancelled."
            }
            fn input_schema(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            async fn call(
                &self,
                ctx: &RequestContext,
                _arguments: Map<String, serde_json::Value>,
            ) -> Result<ToolOutput, ToolError> {
                ctx.cancel.cancelled().await;
                Err(ToolError::Cancelled)
            }
        }

        let pipeline = ToolPipeline::new();
        let session = Arc::new(Session::new(SessionId::generate()));
        let token = CancellationToken::new();
        let ctx = RequestContext::new(session, token.clone(), Some("slow-1".into()));

        token.cancel();
        let err = pipeline.execute(&ctx, &Slow, Map::new()).await.unwrap_err();
        assert_eq!(err.code(), -32603);
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_middleware_runs_in_pipeline() {
        let mut pipeline = ToolPipeline::new();
        pipeline.push(Arc::new(TracingMiddleware));
        assert_eq!(pipeline.len(), 1);

        let ctx = test_ctx();
        let result = pipeline.execute(&ctx, &EchoTool, echo_args("through")).await.unwrap();
        assert!(!result.is_error);
    }
}
