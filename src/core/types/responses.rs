//! Unified response types returned to callers

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::requests::ChatMessage;

/// Token usage accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One completion choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Non-streaming chat completion response, OpenAI-compatible shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    #[serde(default = "chat_completion_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Text of the first choice, when present and textual
    pub fn first_text(&self) -> Option<String> {
        self.choices
            .first()
            .and_then(|c| c.message.text().map(str::to_string))
    }
}

/// Incremental message delta within a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One choice slot within a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Streaming chat chunk, OpenAI-compatible shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    #[serde(default = "chat_chunk_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatChunk {
    /// Content fragment of the first choice, when present
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }
}

/// One embedding vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub index: u32,
    pub embedding: Vec<f32>,
}

/// Embedding response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub model: String,
    pub data: Vec<EmbeddingData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One generated image, by URL or inline base64
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
}

/// Image generation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationResponse {
    pub created: i64,
    pub data: Vec<ImageData>,
}

/// Acknowledgement of an accepted upstream video job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSubmission {
    /// Upstream job id to poll with `get_video_status`
    pub external_task_id: String,
}

/// Snapshot of an upstream video job, as observed by one poll
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VideoStatus {
    /// Completion percentage in [0, 100]
    pub progress: u8,
    /// Whether the job reached successful completion
    pub completed: bool,
    /// Result payload, present when completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Upstream-reported failure, terminal when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn chat_completion_object() -> String {
    "chat.completion".to_string()
}

fn chat_chunk_object() -> String {
    "chat.completion.chunk".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_totals() {
        let usage = Usage::new(100, 25);
        assert_eq!(usage.total_tokens, 125);
    }

    #[test]
    fn test_first_text() {
        let response = ChatResponse {
            id: "r1".to_string(),
            object: chat_completion_object(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::assistant("hello"),
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        };
        assert_eq!(response.first_text().as_deref(), Some("hello"));
    }

    #[test]
    fn test_chunk_parses_openai_wire_format() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,
                "model":"gpt-4o","choices":[{"index":0,"delta":{"content":"hi"},
                "finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.first_content(), Some("hi"));
    }

    #[test]
    fn test_response_parses_without_usage() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"id":"r","created":2,"model":"m","choices":[]}"#,
        )
        .unwrap();
        assert!(response.usage.is_none());
        assert_eq!(response.object, "chat.completion");
    }
}
