//! Anthropic Messages API adapter

use super::sse::SseDecoder;
use super::{ChatStream, ProviderAdapter, endpoint};
use crate::core::types::{
    Capability, ChatChoice, ChatChunk, ChatDelta, ChatMessage, ChatRequest, ChatResponse,
    ChunkChoice, Model, Provider, ProviderType, Usage,
};
use crate::utils::error::{GatewayError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_TOKENS: u32 = 4096;

const CAPABILITIES: &[Capability] = &[
    Capability::Chat,
    Capability::Stream,
    Capability::Vision,
    Capability::Tools,
];

/// Adapter for the Anthropic Messages API
pub struct AnthropicAdapter {
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn request_builder(
        &self,
        builder: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
    }

    /// Reshape the unified request: system messages move into the `system`
    /// field, the rest keep their roles with content passed through.
    fn chat_body(&self, request: &ChatRequest, model: &Model, stream: bool) -> Value {
        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<Value> = Vec::new();
        for message in &request.messages {
            if message.role == "system" {
                if let Some(text) = message.content.as_str() {
                    system_parts.push(text.to_string());
                }
            } else {
                messages.push(json!({
                    "role": message.role,
                    "content": message.content,
                }));
            }
        }

        let max_tokens = request
            .max_tokens
            .unwrap_or_else(|| {
                if model.max_output_tokens > 0 {
                    model.max_output_tokens
                } else {
                    DEFAULT_MAX_TOKENS
                }
            });

        let mut body = json!({
            "model": model.id,
            "messages": messages,
            "max_tokens": max_tokens,
        });
        if !system_parts.is_empty() {
            body["system"] = json!(system_parts.join("\n"));
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop {
            body["stop_sequences"] = json!(stop);
        }
        if let Some(tools) = &request.tools {
            body["tools"] = tools.clone();
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    fn map_stop_reason(reason: &str) -> String {
        match reason {
            "end_turn" | "stop_sequence" => "stop".to_string(),
            "max_tokens" => "length".to_string(),
            "tool_use" => "tool_calls".to_string(),
            other => other.to_string(),
        }
    }

    fn to_chat_response(&self, body: Value, model: &Model) -> ChatResponse {
        let text: String = body
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        (b.get("type").and_then(Value::as_str) == Some("text"))
                            .then(|| b.get("text").and_then(Value::as_str))
                            .flatten()
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = body
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(Self::map_stop_reason);

        let usage = body.get("usage").map(|u| {
            Usage::new(
                u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            )
        });

        ChatResponse {
            id: body
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            object: "chat.completion".to_string(),
            created: Utc::now().timestamp(),
            model: model.id.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::assistant(text),
                finish_reason,
            }],
            usage,
        }
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

async fn check_status(response: reqwest::Response, provider: &Provider) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(512).collect();
    Err(GatewayError::Upstream(format!(
        "provider {} returned status {}: {}",
        provider.id, status, body
    )))
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        model: &Model,
        provider: &Provider,
        api_key: &str,
    ) -> Result<ChatResponse> {
        let body = self.chat_body(request, model, false);
        debug!(model = %model.id, provider = %provider.id, "anthropic messages request");

        let response = self
            .request_builder(
                self.client
                    .post(endpoint(provider, "v1/messages"))
                    .timeout(REQUEST_TIMEOUT),
                api_key,
            )
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, provider).await?;
        let body: Value = response.json().await?;
        Ok(self.to_chat_response(body, model))
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        model: &Model,
        provider: &Provider,
        api_key: &str,
    ) -> Result<ChatStream> {
        let body = self.chat_body(request, model, true);
        let provider_id = provider.id.clone();
        let model_id = model.id.clone();

        let response = self
            .request_builder(
                self.client.post(endpoint(provider, "v1/messages")),
                api_key,
            )
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, provider).await?;

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut decoder = SseDecoder::new();
            let created = Utc::now().timestamp();
            let mut message_id = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| {
                    GatewayError::Upstream(format!(
                        "stream from provider {} failed: {}",
                        provider_id, e
                    ))
                })?;
                for event in decoder.feed(&chunk) {
                    let name = event.event.as_deref().unwrap_or("");
                    match name {
                        "message_start" => {
                            let value: Value = serde_json::from_str(&event.data)?;
                            if let Some(id) = value.pointer("/message/id").and_then(Value::as_str) {
                                message_id = id.to_string();
                            }
                        }
                        "content_block_delta" => {
                            let value: Value = serde_json::from_str(&event.data)?;
                            if let Some(text) =
                                value.pointer("/delta/text").and_then(Value::as_str)
                            {
                                yield ChatChunk {
                                    id: message_id.clone(),
                                    object: "chat.completion.chunk".to_string(),
                                    created,
                                    model: model_id.clone(),
                                    choices: vec![ChunkChoice {
                                        index: 0,
                                        delta: ChatDelta {
                                            role: None,
                                            content: Some(text.to_string()),
                                        },
                                        finish_reason: None,
                                    }],
                                };
                            }
                        }
                        "message_delta" => {
                            let value: Value = serde_json::from_str(&event.data)?;
                            if let Some(reason) =
                                value.pointer("/delta/stop_reason").and_then(Value::as_str)
                            {
                                yield ChatChunk {
                                    id: message_id.clone(),
                                    object: "chat.completion.chunk".to_string(),
                                    created,
                                    model: model_id.clone(),
                                    choices: vec![ChunkChoice {
                                        index: 0,
                                        delta: ChatDelta::default(),
                                        finish_reason: Some(Self::map_stop_reason(reason)),
                                    }],
                                };
                            }
                        }
                        "message_stop" => return,
                        _ => {}
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn health_check(&self, provider: &Provider) -> Result<()> {
        let response = self
            .request_builder(
                self.client
                    .get(endpoint(provider, "v1/models"))
                    .timeout(Duration::from_secs(10)),
                &provider.api_key,
            )
            .send()
            .await?;
        check_status(response, provider).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> Provider {
        Provider::new("a1", "anthropic", ProviderType::Anthropic, server.uri())
    }

    fn claude_model() -> Model {
        Model::new(
            "claude-3-5-sonnet",
            "a1",
            vec![Capability::Chat, Capability::Stream],
            200_000,
        )
    }

    #[tokio::test]
    async fn test_chat_moves_system_message_and_maps_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-3-5-sonnet",
                "system": "be brief",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "type": "message",
                "model": "claude-3-5-sonnet",
                "content": [{"type": "text", "text": "hi there"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 4}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new();
        let mut request = ChatRequest::user("hello");
        request.messages.insert(0, ChatMessage::system("be brief"));

        let response = adapter
            .chat(&request, &claude_model(), &provider_for(&server), "sk-ant")
            .await
            .unwrap();

        assert_eq!(response.first_text().as_deref(), Some("hi there"));
        assert_eq!(
            response.choices[0].finish_reason.as_deref(),
            Some("stop")
        );
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 4);
    }

    #[tokio::test]
    async fn test_max_tokens_defaults_from_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({"max_tokens": 4096})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_2",
                "content": [],
                "usage": {"input_tokens": 1, "output_tokens": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new();
        adapter
            .chat(
                &ChatRequest::user("hi"),
                &claude_model(),
                &provider_for(&server),
                "sk-ant",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stream_maps_deltas_and_stop() {
        let server = MockServer::start().await;
        let sse = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_3\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"he\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"y\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse.as_bytes().to_vec(), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new();
        let stream = adapter
            .chat_stream(
                &ChatRequest::user("hi"),
                &claude_model(),
                &provider_for(&server),
                "sk-ant",
            )
            .await
            .unwrap();

        let chunks: Vec<ChatChunk> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 3);
        let text: String = chunks
            .iter()
            .filter_map(|c| c.first_content())
            .collect();
        assert_eq!(text, "hey");
        assert_eq!(
            chunks.last().unwrap().choices[0].finish_reason.as_deref(),
            Some("stop")
        );
        assert!(chunks.iter().all(|c| c.id == "msg_3"));
    }

    #[tokio::test]
    async fn test_upstream_error_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new();
        let err = adapter
            .chat(
                &ChatRequest::user("hi"),
                &claude_model(),
                &provider_for(&server),
                "sk-ant",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));
    }
}
