//! Unified request types routed by the gateway
//!
//! Message content is carried as opaque JSON so multimodal payloads pass
//! through the router untouched; adapters reshape it per vendor protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One chat message in OpenAI-compatible shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant`, or `tool`
    pub role: String,
    /// String content or structured content parts
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Value::String(content.into()),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Value::String(content.into()),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Value::String(content.into()),
            name: None,
        }
    }

    /// String view of the content, when it is a plain string
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// Chat completion request
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatRequest {
    /// Requested model id; empty lets the router choose freely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Tool definitions, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Response format constraint (e.g. `{"type": "json_object"}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ChatRequest {
    /// A minimal single-user-message request.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(content)],
            ..Default::default()
        }
    }

    /// Whether the request declares JSON-mode output
    pub fn wants_json_mode(&self) -> bool {
        self.response_format
            .as_ref()
            .and_then(|f| f.get("type"))
            .and_then(Value::as_str)
            .is_some_and(|t| t == "json_object" || t == "json_schema")
    }

    /// Whether the request carries tool definitions
    pub fn wants_tools(&self) -> bool {
        self.tools
            .as_ref()
            .is_some_and(|t| !t.as_array().is_some_and(Vec::is_empty))
    }

    /// Whether any message carries structured (non-string) content
    pub fn wants_vision(&self) -> bool {
        self.messages.iter().any(|m| {
            m.content.as_array().is_some_and(|parts| {
                parts.iter().any(|p| {
                    p.get("type")
                        .and_then(Value::as_str)
                        .is_some_and(|t| t == "image_url" || t == "input_image")
                })
            })
        })
    }
}

/// Embedding request
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// One or more input texts
    pub input: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Image generation request
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageGenerationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    /// Number of images, defaults to 1 upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    /// Target dimensions such as `1024x1024`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Video generation request
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VideoGenerationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}
