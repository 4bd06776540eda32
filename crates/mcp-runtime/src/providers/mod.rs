//! Capability providers.
//!
//! Providers serve one of {prompts, resources, tools} and are aggregated by
//! the [`registry::ProviderRegistry`]: registration order is resolution
//! order, the first provider that returns a non-"not found" outcome wins.

pub mod memory;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::RequestContext;
use crate::error::ProviderError;
use crate::protocol::messages::{
    CreateMessageParams, CreateMessageResult, GetPromptResult, PromptDescriptor,
    ReadResourceResult, ResourceDescriptor, ResourceTemplateDescriptor, ResourceUpdate,
    ToolDescriptor,
};
use crate::tools::Tool;

/// One page of a provider-level listing. A present `next_cursor` is the
/// provider's own opaque continuation token.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// A complete, unpaginated listing.
    #[must_use]
    pub const fn complete(items: Vec<T>) -> Self {
        Self { items, next_cursor: None }
    }
}

/// Serves tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// List tool metadata, optionally continuing from a provider cursor.
    async fn list_tools(&self, cursor: Option<&str>) -> Result<Page<ToolDescriptor>, ProviderError>;

    /// Resolve a tool by exact name.
    async fn find_tool(&self, name: &str) -> Option<Arc<dyn Tool>>;
}

/// Serves prompts.
#[async_trait]
pub trait PromptProvider: Send + Sync {
    /// List prompt metadata.
    async fn list_prompts(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<PromptDescriptor>, ProviderError>;

    /// Render a prompt. `NotFound` sends the registry to the next provider.
    async fn get_prompt(
        &self,
        ctx: &RequestContext,
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<GetPromptResult, ProviderError>;
}

/// Serves resources.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// List resource metadata.
    async fn list_resources(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<ResourceDescriptor>, ProviderError>;

    /// Read a resource's contents by URI.
    async fn read_resource(
        &self,
        ctx: &RequestContext,
        uri: &str,
    ) -> Result<ReadResourceResult, ProviderError>;

    /// List resource templates. Defaults to an empty page for providers
    /// without templates.
    async fn list_templates(
        &self,
        _cursor: Option<&str>,
    ) -> Result<Page<ResourceTemplateDescriptor>, ProviderError> {
        Ok(Page::complete(Vec::new()))
    }

    /// Subscribe to change notifications for a URI. The transport streams
    /// the receiver back to the client as notifications.
    async fn subscribe(
        &self,
        uri: &str,
    ) -> Result<mpsc::Receiver<ResourceUpdate>, ProviderError> {
        Err(ProviderError::NotSupported(format!("subscribe: {uri}")))
    }
}

/// Services server-initiated `sampling/createMessage` requests. Optional;
/// without one the dispatcher answers MethodNotFound.
#[async_trait]
pub trait SamplingProvider: Send + Sync {
    async fn create_message(
        &self,
        ctx: &RequestContext,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, ProviderError>;
}
