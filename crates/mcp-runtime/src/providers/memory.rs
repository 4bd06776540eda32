//! In-memory providers.
//!
//! The simple backing most hosts start from: tools, prompts, and resources
//! registered at startup and held in vectors. Registration order within a
//! provider is listing order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::config;
use crate::context::RequestContext;
use crate::error::ProviderError;
use crate::protocol::messages::{
    Content, GetPromptResult, PromptDescriptor, PromptMessage, ReadResourceResult,
    ResourceContents, ResourceDescriptor, ResourceUpdate, ToolDescriptor,
};
use crate::providers::{Page, PromptProvider, ResourceProvider, ToolProvider};
use crate::tools::Tool;

/// Tool provider over a fixed set of tools.
pub struct StaticToolProvider {
    tools: Vec<Arc<dyn Tool>>,
}

impl StaticToolProvider {
    /// Create a provider from registered tools.
    #[must_use]
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl ToolProvider for StaticToolProvider {
    async fn list_tools(
        &self,
        _cursor: Option<&str>,
    ) -> Result<Page<ToolDescriptor>, ProviderError> {
        Ok(Page::complete(self.tools.iter().map(|t| t.descriptor()).collect()))
    }

    async fn find_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }
}

impl std::fmt::Debug for StaticToolProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToolProvider").field("tools", &self.tools.len()).finish()
    }
}

/// A prompt backed by a template string; `{name}` placeholders are filled
/// from the call arguments.
#[derive(Debug, Clone)]
pub struct StaticPrompt {
    pub descriptor: PromptDescriptor,
    pub template: String,
}

/// Prompt provider over a fixed set of template prompts.
#[derive(Debug, Default)]
pub struct StaticPromptProvider {
    prompts: Vec<StaticPrompt>,
}

impl StaticPromptProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prompt.
    #[must_use]
    pub fn with_prompt(mut self, descriptor: PromptDescriptor, template: impl Into<String>) -> Self {
        self.prompts.push(StaticPrompt { descriptor, template: template.into() });
        self
    }
}

#[async_trait]
impl PromptProvider for StaticPromptProvider {
    async fn list_prompts(
        &self,
        _cursor: Option<&str>,
    ) -> Result<Page<PromptDescriptor>, ProviderError> {
        Ok(Page::complete(self.prompts.iter().map(|p| p.descriptor.clone()).collect()))
    }

    async fn get_prompt(
        &self,
        _ctx: &RequestContext,
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<GetPromptResult, ProviderError> {
        let prompt = self
            .prompts
            .iter()
            .find(|p| p.descriptor.name == name)
            .ok_or_else(|| ProviderError::not_found(name))?;

        let mut text = prompt.template.clone();
        for (key, value) in arguments {
            let placeholder = format!("{{{key}}}");
            let replacement = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            text = text.replace(&placeholder, &replacement);
        }

        Ok(GetPromptResult {
            description: prompt.descriptor.description.clone(),
            messages: vec![PromptMessage { role: "user".into(), content: Content::text(text) }],
        })
    }
}

/// One in-memory resource.
#[derive(Debug, Clone)]
pub struct StaticResource {
    pub descriptor: ResourceDescriptor,
    pub text: String,
}

/// Resource provider over fixed in-memory documents, with change
/// notification fan-out for subscribers.
pub struct StaticResourceProvider {
    resources: Vec<StaticResource>,
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<ResourceUpdate>>>>,
}

impl StaticResourceProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self { resources: Vec::new(), subscribers: RwLock::new(HashMap::new()) }
    }

    /// Add a resource.
    #[must_use]
    pub fn with_resource(mut self, descriptor: ResourceDescriptor, text: impl Into<String>) -> Self {
        self.resources.push(StaticResource { descriptor, text: text.into() });
        self
    }

    /// Notify subscribers that a URI changed. Full subscriber channels are
    /// skipped.
    pub async fn notify_changed(&self, uri: &str) {
        let subscribers = self.subscribers.read().await;
        if let Some(senders) = subscribers.get(uri) {
            for sender in senders {
                if sender.try_send(ResourceUpdate { uri: uri.to_string() }).is_err() {
                    tracing::warn!(uri = %uri, "Dropping resource update for slow subscriber");
                }
            }
        }
    }
}

impl Default for StaticResourceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for StaticResourceProvider {
    async fn list_resources(
        &self,
        _cursor: Option<&str>,
    ) -> Result<Page<ResourceDescriptor>, ProviderError> {
        Ok(Page::complete(self.resources.iter().map(|r| r.descriptor.clone()).collect()))
    }

    async fn read_resource(
        &self,
        _ctx: &RequestContext,
        uri: &str,
    ) -> Result<ReadResourceResult, ProviderError> {
        let resource = self
            .resources
            .iter()
            .find(|r| r.descriptor.uri == uri)
            .ok_or_else(|| ProviderError::not_found(uri))?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: resource.descriptor.uri.clone(),
                mime_type: resource.descriptor.mime_type.clone(),
                text: Some(resource.text.clone()),
                blob: None,
            }],
        })
    }

    async fn subscribe(
        &self,
        uri: &str,
    ) -> Result<mpsc::Receiver<ResourceUpdate>, ProviderError> {
        if !self.resources.iter().any(|r| r.descriptor.uri == uri) {
            return Err(ProviderError::not_found(uri));
        }

        let (tx, rx) = mpsc::channel(config::transport::CLIENT_OUTBOX_CAPACITY);
        self.subscribers.write().await.entry(uri.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

impl std::fmt::Debug for StaticResourceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticResourceProvider")
            .field("resources", &self.resources.len())
            .finish()
    }
}
