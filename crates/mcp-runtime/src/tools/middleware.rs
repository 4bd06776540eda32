//! Tool-call middleware chain.
//!
//! Middlewares wrap tool invocation in configuration order. Each one may
//! rewrite arguments, enrich the request context, short-circuit with its own
//! result, or post-process the shaped result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Map;

use crate::config;
use crate::context::RequestContext;
use crate::error::ToolError;
use crate::protocol::messages::{CallToolResult, Content};
use crate::tools::{shape_output, Tool};

/// One element of the middleware chain.
#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    /// Process the call, delegating to `next` to continue the chain.
    async fn handle(
        &self,
        ctx: &RequestContext,
        tool: &dyn Tool,
        arguments: Map<String, serde_json::Value>,
        next: Next<'_>,
    ) -> Result<CallToolResult, ToolError>;
}

/// Remainder of the chain; the innermost step invokes the tool itself and
/// shapes its output.
pub struct Next<'a> {
    pub(crate) chain: &'a [Arc<dyn ToolMiddleware>],
    pub(crate) tool: &'a dyn Tool,
}

impl Next<'_> {
    /// Run the rest of the chain.
    pub async fn run(
        self,
        ctx: &RequestContext,
        arguments: Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, ToolError> {
        if let Some((head, rest)) = self.chain.split_first() {
            head.handle(ctx, self.tool, arguments, Next { chain: rest, tool: self.tool }).await
        } else {
            let output = self.tool.call(ctx, arguments).await?;
            Ok(shape_output(output))
        }
    }
}

/// Fills in missing arguments from a static defaults map, then forces
/// overrides on top of whatever the client sent.
#[derive(Debug, Default)]
pub struct ArgumentDefaults {
    defaults: Map<String, serde_json::Value>,
    overrides: Map<String, serde_json::Value>,
}

impl ArgumentDefaults {
    /// Create an empty defaulting middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value used when the client omits the key.
    #[must_use]
    pub fn with_default(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    /// Add a value that always replaces what the client sent.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }
}

#[async_trait]
impl ToolMiddleware for ArgumentDefaults {
    async fn handle(
        &self,
        ctx: &RequestContext,
        _tool: &dyn Tool,
        mut arguments: Map<String, serde_json::Value>,
        next: Next<'_>,
    ) -> Result<CallToolResult, ToolError> {
        for (key, value) in &self.defaults {
            arguments.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for (key, value) in &self.overrides {
            arguments.insert(key.clone(), value.clone());
        }
        next.run(ctx, arguments).await
    }
}

/// Whitelist/blacklist filter on argument names.
#[derive(Debug, Default)]
pub struct ArgumentFilter {
    allow: Option<HashSet<String>>,
    deny: HashSet<String>,
}

impl ArgumentFilter {
    /// Create a filter that passes everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only arguments in `names` survive.
    #[must_use]
    pub fn allow_only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Arguments in `names` are stripped.
    #[must_use]
    pub fn deny<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny.extend(names.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl ToolMiddleware for ArgumentFilter {
    async fn handle(
        &self,
        ctx: &RequestContext,
        _tool: &dyn Tool,
        arguments: Map<String, serde_json::Value>,
        next: Next<'_>,
    ) -> Result<CallToolResult, ToolError> {
        let filtered = arguments
            .into_iter()
            .filter(|(key, _)| {
                if self.deny.contains(key) {
                    return false;
                }
                self.allow.as_ref().is_none_or(|allow| allow.contains(key))
            })
            .collect();
        next.run(ctx, filtered).await
    }
}

/// Emits a structured trace record around each call.
#[derive(Debug, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl ToolMiddleware for TracingMiddleware {
    async fn handle(
        &self,
        ctx: &RequestContext,
        tool: &dyn Tool,
        arguments: Map<String, serde_json::Value>,
        next: Next<'_>,
    ) -> Result<CallToolResult, ToolError> {
        let start = Instant::now();
        tracing::info!(tool = %tool.name(), session_id = %ctx.session.id, "Executing tool");

        let result = next.run(ctx, arguments).await;

        match &result {
            Ok(shaped) => tracing::info!(
                tool = %tool.name(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                is_error = shaped.is_error,
                "Tool completed"
            ),
            Err(e) => tracing::error!(tool = %tool.name(), error = %e, "Tool execution failed"),
        }

        result
    }
}

/// Caps text content in the shaped result.
#[derive(Debug)]
pub struct TruncateOutput {
    max_bytes: usize,
}

impl TruncateOutput {
    /// Cap at the runtime default.
    #[must_use]
    pub const fn new() -> Self {
        Self { max_bytes: config::tools::MAX_TEXT_BYTES }
    }

    /// Cap at an explicit byte limit.
    #[must_use]
    pub const fn with_limit(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl Default for TruncateOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolMiddleware for TruncateOutput {
    async fn handle(
        &self,
        ctx: &RequestContext,
        tool: &dyn Tool,
        arguments: Map<String, serde_json::Value>,
        next: Next<'_>,
    ) -> Result<CallToolResult, ToolError> {
        let mut result = next.run(ctx, arguments).await?;

        for item in &mut result.content {
            if let Content::Text { text } = item {
                if text.len() > self.max_bytes {
                    tracing::warn!(
                        tool = %tool.name(),
                        size = text.len(),
                        limit = self.max_bytes,
                        "Truncating oversized tool output"
                    );
                    let mut end = self.max_bytes;
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    text.truncate(end);
                    text.push_str("\n[output truncated]");
                }
            }
        }

        Ok(result)
    }
}
