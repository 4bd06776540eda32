//! Provider aggregation and name resolution.
//!
//! The registry owns the three ordered provider lists. Lookups iterate in
//! registration order until a provider claims the name; listings concatenate
//! provider pages behind a composite cursor identifying
//! `(provider index, inner cursor)`.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::context::RequestContext;
use crate::error::{ProviderError, RpcError};
use crate::protocol::messages::{
    GetPromptResult, PromptDescriptor, ReadResourceResult, ResourceDescriptor,
    ResourceTemplateDescriptor, ResourceUpdate, ToolDescriptor,
};
use crate::providers::{Page, PromptProvider, ResourceProvider, ToolProvider};
use crate::tools::Tool;

/// Opaque composite cursor for aggregated listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CompositeCursor {
    /// Index into the provider list.
    provider: usize,
    /// The provider's own continuation token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inner: Option<String>,
}

impl CompositeCursor {
    fn encode(&self) -> String {
        // Serializing a two-field struct cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    fn decode(cursor: &str) -> Result<Self, RpcError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|_| RpcError::invalid_params("malformed cursor"))?;
        serde_json::from_slice(&bytes).map_err(|_| RpcError::invalid_params("malformed cursor"))
    }
}

/// Aggregated, paginated listing produced by the registry.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Ordered aggregation of prompt, resource, and tool providers.
#[derive(Default)]
pub struct ProviderRegistry {
    tools: Vec<Arc<dyn ToolProvider>>,
    prompts: Vec<Arc<dyn PromptProvider>>,
    resources: Vec<Arc<dyn ResourceProvider>>,
    /// When set, a dashed name resolves to its underscored registration and
    /// vice versa.
    normalize_names: bool,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable symmetric dash/underscore name resolution.
    #[must_use]
    pub const fn with_name_normalization(mut self, enabled: bool) -> Self {
        self.normalize_names = enabled;
        self
    }

    /// Register a tool provider; earlier registrations shadow later ones.
    pub fn register_tool_provider(&mut self, provider: Arc<dyn ToolProvider>) {
        self.tools.push(provider);
    }

    /// Register a prompt provider.
    pub fn register_prompt_provider(&mut self, provider: Arc<dyn PromptProvider>) {
        self.prompts.push(provider);
    }

    /// Register a resource provider.
    pub fn register_resource_provider(&mut self, provider: Arc<dyn ResourceProvider>) {
        self.resources.push(provider);
    }

    /// True iff at least one tool provider is registered.
    #[must_use]
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// True iff at least one prompt provider is registered.
    #[must_use]
    pub fn has_prompts(&self) -> bool {
        !self.prompts.is_empty()
    }

    /// True iff at least one resource provider is registered.
    #[must_use]
    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    /// Resolve a tool by name across providers; first match wins.
    pub async fn resolve_tool(&self, name: &str) -> Result<Arc<dyn Tool>, RpcError> {
        for candidate in self.name_candidates(name) {
            for provider in &self.tools {
                if let Some(tool) = provider.find_tool(&candidate).await {
                    return Ok(tool);
                }
            }
        }
        Err(RpcError::ToolNotFound(name.to_string()))
    }

    /// Aggregate `tools/list` across providers.
    pub async fn list_tools(
        &self,
        cursor: Option<&str>,
    ) -> Result<Listing<ToolDescriptor>, RpcError> {
        let providers = &self.tools;
        aggregate(cursor, providers.len(), |index, inner| {
            let provider = Arc::clone(&providers[index]);
            async move { provider.list_tools(inner.as_deref()).await }
        })
        .await
    }

    /// Render a prompt; providers are consulted in registration order.
    pub async fn get_prompt(
        &self,
        ctx: &RequestContext,
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<GetPromptResult, RpcError> {
        for candidate in self.name_candidates(name) {
            for provider in &self.prompts {
                match provider.get_prompt(ctx, &candidate, arguments).await {
                    Ok(result) => return Ok(result),
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(RpcError::internal(err.to_string())),
                }
            }
        }
        Err(RpcError::PromptNotFound(name.to_string()))
    }

    /// Aggregate `prompts/list` across providers.
    pub async fn list_prompts(
        &self,
        cursor: Option<&str>,
    ) -> Result<Listing<PromptDescriptor>, RpcError> {
        let providers = &self.prompts;
        aggregate(cursor, providers.len(), |index, inner| {
            let provider = Arc::clone(&providers[index]);
            async move { provider.list_prompts(inner.as_deref()).await }
        })
        .await
    }

    /// Read a resource; providers are consulted in registration order.
    pub async fn read_resource(
        &self,
        ctx: &RequestContext,
        uri: &str,
    ) -> Result<ReadResourceResult, RpcError> {
        for provider in &self.resources {
            match provider.read_resource(ctx, uri).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(RpcError::internal(err.to_string())),
            }
        }
        Err(RpcError::ResourceNotFound(uri.to_string()))
    }

    /// Aggregate `resources/list` across providers.
    pub async fn list_resources(
        &self,
        cursor: Option<&str>,
    ) -> Result<Listing<ResourceDescriptor>, RpcError> {
        let providers = &self.resources;
        aggregate(cursor, providers.len(), |index, inner| {
            let provider = Arc::clone(&providers[index]);
            async move { provider.list_resources(inner.as_deref()).await }
        })
        .await
    }

    /// Aggregate `resources/templates/list` across providers.
    pub async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<Listing<ResourceTemplateDescriptor>, RpcError> {
        let providers = &self.resources;
        aggregate(cursor, providers.len(), |index, inner| {
            let provider = Arc::clone(&providers[index]);
            async move { provider.list_templates(inner.as_deref()).await }
        })
        .await
    }

    /// Subscribe to a resource; the first provider that accepts wins.
    pub async fn subscribe_resource(
        &self,
        uri: &str,
    ) -> Result<mpsc::Receiver<ResourceUpdate>, RpcError> {
        for provider in &self.resources {
            match provider.subscribe(uri).await {
                Ok(stream) => return Ok(stream),
                Err(err) if err.is_not_found() => {}
                Err(ProviderError::NotSupported(_)) => {}
                Err(err) => return Err(RpcError::internal(err.to_string())),
            }
        }
        Err(RpcError::ResourceNotFound(uri.to_string()))
    }

    /// The spellings a lookup should try: the exact name, then the
    /// alternate-separator form when normalization is on.
    fn name_candidates(&self, name: &str) -> Vec<String> {
        let mut candidates = vec![name.to_string()];
        if self.normalize_names {
            let underscored = name.replace('-', "_");
            if underscored != name {
                candidates.push(underscored);
            }
            let dashed = name.replace('_', "-");
            if dashed != name {
                candidates.push(dashed);
            }
        }
        candidates
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("tools", &self.tools.len())
            .field("prompts", &self.prompts.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// Walk providers from the cursor position, concatenating pages until one
/// provider reports an inner continuation or the list runs out.
async fn aggregate<T, F, Fut>(
    cursor: Option<&str>,
    provider_count: usize,
    mut fetch: F,
) -> Result<Listing<T>, RpcError>
where
    F: FnMut(usize, Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Page<T>, ProviderError>>,
{
    let start = match cursor {
        Some(cursor) => CompositeCursor::decode(cursor)?,
        None => CompositeCursor { provider: 0, inner: None },
    };
    if start.provider > provider_count {
        return Err(RpcError::invalid_params("cursor out of range"));
    }

    let mut items = Vec::new();
    let mut inner = start.inner;

    for index in start.provider..provider_count {
        let page = fetch(index, inner.take())
            .await
            .map_err(|e| RpcError::internal(e.to_string()))?;
        items.extend(page.items);

        if let Some(next_inner) = page.next_cursor {
            return Ok(Listing {
                items,
                next_cursor: Some(
                    CompositeCursor { provider: index, inner: Some(next_inner) }.encode(),
                ),
            });
        }
    }

    Ok(Listing { items, next_cursor: None })
}
