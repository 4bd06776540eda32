//! Tool abstraction and execution pipeline.
//!
//! A tool is a named, schema-described capability invoked via `tools/call`.
//! The pipeline validates arguments against the tool's JSON Schema, runs the
//! configured middleware chain, invokes the tool, and shapes the output into
//! typed content items.

pub mod builtin;
pub mod middleware;
pub mod pipeline;

use async_trait::async_trait;
use serde_json::Map;

use crate::context::RequestContext;
use crate::error::ToolError;
use crate::protocol::messages::{CallToolResult, Content, ToolDescriptor};

/// What a tool hands back to the pipeline before shaping.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// A bare string, shaped as a single text item.
    Text(String),
    /// An arbitrary JSON value; primitives become text, structures become a
    /// single JSON item.
    Value(serde_json::Value),
    /// Pre-built content items, passed through unchanged.
    Content(Vec<Content>),
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<serde_json::Value> for ToolOutput {
    fn from(v: serde_json::Value) -> Self {
        Self::Value(v)
    }
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// A named, schema-described capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, unique within its provider.
    fn name(&self) -> &str;

    /// Human description for the client.
    fn description(&self) -> &str;

    /// JSON Schema fragment describing `arguments`.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute with validated arguments. The context carries the session and
    /// the cancellation token.
    async fn call(
        &self,
        ctx: &RequestContext,
        arguments: Map<String, serde_json::Value>,
    ) -> Result<ToolOutput, ToolError>;

    /// Wire metadata for `tools/list`.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Shape a tool's output into the wire result.
///
/// Primitives (strings, numbers, booleans, null) become a single text item;
/// structured values become a single JSON item; content sequences pass
/// through.
#[must_use]
pub fn shape_output(output: ToolOutput) -> CallToolResult {
    match output {
        ToolOutput::Text(text) => CallToolResult::success(vec![Content::text(text)]),
        ToolOutput::Value(value) => {
            let item = match &value {
                serde_json::Value::String(s) => Content::text(s.clone()),
                serde_json::Value::Null => Content::text(""),
                serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {
                    Content::text(value.to_string())
                }
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    Content::json(value)
                }
            };
            CallToolResult::success(vec![item])
        }
        ToolOutput::Content(items) => CallToolResult::success(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_primitive_as_text() {
        let result = shape_output(ToolOutput::Value(json!("hi")));
        assert_eq!(result.content, vec![Content::text("hi")]);
        assert!(!result.is_error);

        let result = shape_output(ToolOutput::Value(json!(42)));
        assert_eq!(result.content, vec![Content::text("42")]);

        let result = shape_output(ToolOutput::Value(json!(true)));
        assert_eq!(result.content, vec![Content::text("true")]);
    }

    #[test]
    fn test_shape_structured_as_json() {
        let result = shape_output(ToolOutput::Value(json!({"rows": [1, 2]})));
        assert_eq!(result.content, vec![Content::json(json!({"rows": [1, 2]}))]);
    }

    #[test]
    fn test_shape_content_preserved() {
        let items = vec![Content::text("a"), Content::json(json!({"b": 1}))];
        let result = shape_output(ToolOutput::Content(items.clone()));
        assert_eq!(result.content, items);
    }
}
