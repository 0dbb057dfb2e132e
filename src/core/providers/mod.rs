//! Upstream adapters
//!
//! One adapter per provider family translates unified requests into vendor
//! calls. Capability membership is a set lookup on the value each adapter
//! carries; there is no shared base type. The registry is a plain value
//! constructed at process init and passed to consumers.

pub mod anthropic;
pub mod openai;
pub mod sse;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiCompatibleAdapter;

use crate::core::types::{
    Capability, ChatChunk, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse,
    ImageGenerationRequest, ImageGenerationResponse, Model, Provider, ProviderType,
    VideoGenerationRequest, VideoStatus, VideoSubmission,
};
use crate::utils::error::{GatewayError, Result};
use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

/// Ordered lazy sequence of streaming chat chunks.
///
/// The stream closes on upstream EOF, on upstream error (the last element
/// carries the error), or when the caller drops it.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// Contract every provider family implements.
///
/// Adapters are stateless with respect to catalog data: they must not
/// retain `provider` or `model` references past a call.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider family this adapter speaks for
    fn provider_type(&self) -> ProviderType;

    /// Capability set of this adapter
    fn capabilities(&self) -> &'static [Capability];

    fn supports_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Cheap upstream reachability check
    async fn health_check(&self, provider: &Provider) -> Result<()>;

    async fn chat(
        &self,
        request: &ChatRequest,
        model: &Model,
        provider: &Provider,
        api_key: &str,
    ) -> Result<ChatResponse>;

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        model: &Model,
        provider: &Provider,
        api_key: &str,
    ) -> Result<ChatStream>;

    async fn embed(
        &self,
        _request: &EmbeddingRequest,
        _model: &Model,
        provider: &Provider,
        _api_key: &str,
    ) -> Result<EmbeddingResponse> {
        Err(GatewayError::Unsupported(format!(
            "embeddings not supported by provider {}",
            provider.id
        )))
    }

    async fn generate_image(
        &self,
        _request: &ImageGenerationRequest,
        _model: &Model,
        provider: &Provider,
        _api_key: &str,
    ) -> Result<ImageGenerationResponse> {
        Err(GatewayError::Unsupported(format!(
            "image generation not supported by provider {}",
            provider.id
        )))
    }

    /// Submit an asynchronous video job; completion is observed through
    /// `get_video_status`.
    async fn generate_video(
        &self,
        _request: &VideoGenerationRequest,
        _model: &Model,
        provider: &Provider,
        _api_key: &str,
    ) -> Result<VideoSubmission> {
        Err(GatewayError::Unsupported(format!(
            "video generation not supported by provider {}",
            provider.id
        )))
    }

    async fn get_video_status(
        &self,
        _external_task_id: &str,
        provider: &Provider,
        _api_key: &str,
    ) -> Result<VideoStatus> {
        Err(GatewayError::Unsupported(format!(
            "video polling not supported by provider {}",
            provider.id
        )))
    }
}

/// Adapter lookup by provider family.
///
/// Constructed once at init; consumers receive it by value/Arc rather than
/// through a process-wide singleton.
pub struct AdapterRegistry {
    adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry wired with the built-in adapter set.
    ///
    /// OpenAI-compatible endpoints (Azure, Ollama, Google's compatibility
    /// surface, self-hosted gateways) share one adapter instance.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let openai: Arc<dyn ProviderAdapter> = Arc::new(OpenAiCompatibleAdapter::new());
        for provider_type in [
            ProviderType::OpenAi,
            ProviderType::Azure,
            ProviderType::Ollama,
            ProviderType::Google,
            ProviderType::Generic,
        ] {
            registry.register(provider_type, openai.clone());
        }
        registry.register(ProviderType::Anthropic, Arc::new(AnthropicAdapter::new()));
        registry
    }

    pub fn register(&mut self, provider_type: ProviderType, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(provider_type, adapter);
    }

    pub fn get(&self, provider_type: ProviderType) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider_type).cloned()
    }
}

/// Join a provider base URL with an endpoint path.
pub(crate) fn endpoint(provider: &Provider, path: &str) -> String {
    format!(
        "{}/{}",
        provider.base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
