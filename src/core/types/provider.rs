//! Provider and model catalog types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream provider families the gateway can speak to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAi,
    Anthropic,
    Google,
    Azure,
    Ollama,
    Generic,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Google => "google",
            ProviderType::Azure => "azure",
            ProviderType::Ollama => "ollama",
            ProviderType::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model capability tags.
///
/// The wire strings are shared with configuration files and the routing
/// context; they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Stream,
    Vision,
    Tools,
    JsonMode,
    Embedding,
    ImageGeneration,
    VideoGeneration,
    AudioGeneration,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Stream => "stream",
            Capability::Vision => "vision",
            Capability::Tools => "tools",
            Capability::JsonMode => "json_mode",
            Capability::Embedding => "embedding",
            Capability::ImageGeneration => "image_generation",
            Capability::VideoGeneration => "video_generation",
            Capability::AudioGeneration => "audio_generation",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured upstream provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    /// Opaque unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Provider family, selects the adapter
    pub provider_type: ProviderType,
    /// Base URL of the upstream API
    pub base_url: String,
    /// Provider-level API key, used when no credential pool account is available
    #[serde(default)]
    pub api_key: String,
    /// Scheduling weight, >= 1
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Scheduling priority, >= 0, higher wins
    #[serde(default)]
    pub priority: u32,
    /// Disabled providers are invisible to the registry
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional requests-per-minute hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_rpm: Option<u32>,
    /// Optional tokens-per-minute hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_tpm: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    /// Create an enabled provider with default scheduling knobs.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider_type: ProviderType,
        base_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            provider_type,
            base_url: base_url.into(),
            api_key: String::new(),
            weight: 1,
            priority: 0,
            enabled: true,
            rate_limit_rpm: None,
            rate_limit_tpm: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }
}

/// A model in a provider's catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Globally unique model id
    pub id: String,
    /// Owning provider id
    pub provider_id: String,
    /// Display name
    #[serde(default)]
    pub display_name: String,
    /// Supported capabilities; never empty for a valid model
    pub capabilities: Vec<Capability>,
    /// Context window in tokens
    pub context_window: u32,
    /// Maximum output tokens per completion
    pub max_output_tokens: u32,
    /// Input cost per 1K tokens, USD
    #[serde(default)]
    pub input_cost_per_1k: f64,
    /// Output cost per 1K tokens, USD
    #[serde(default)]
    pub output_cost_per_1k: f64,
    /// Disabled models are invisible to the registry
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Model {
    /// Create an enabled chat model with the given catalog attributes.
    pub fn new(
        id: impl Into<String>,
        provider_id: impl Into<String>,
        capabilities: Vec<Capability>,
        context_window: u32,
    ) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            provider_id: provider_id.into(),
            capabilities,
            context_window,
            max_output_tokens: 4096,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            enabled: true,
        }
    }

    pub fn with_costs(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn has_all_capabilities(&self, capabilities: &[Capability]) -> bool {
        capabilities.iter().all(|c| self.has_capability(*c))
    }

    /// Combined input + output cost per 1K tokens, the unit the cost
    /// optimization strategy compares on.
    pub fn unit_cost(&self) -> f64 {
        self.input_cost_per_1k + self.output_cost_per_1k
    }
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}
