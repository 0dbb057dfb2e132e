//! OpenAI-compatible adapter
//!
//! Speaks the OpenAI REST surface: chat completions (plain and SSE),
//! embeddings, image generations, and the asynchronous video jobs API.
//! Azure, Ollama, Google's compatibility endpoint, and self-hosted gateways
//! expose the same surface, so they share this adapter with only the auth
//! header differing.

use super::sse::SseDecoder;
use super::{ChatStream, ProviderAdapter, endpoint};
use crate::core::types::{
    Capability, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse,
    ImageGenerationRequest, ImageGenerationResponse, Model, Provider, ProviderType,
    VideoGenerationRequest, VideoStatus, VideoSubmission,
};
use crate::utils::error::{GatewayError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const CAPABILITIES: &[Capability] = &[
    Capability::Chat,
    Capability::Stream,
    Capability::Vision,
    Capability::Tools,
    Capability::JsonMode,
    Capability::Embedding,
    Capability::ImageGeneration,
    Capability::VideoGeneration,
];

/// Adapter for OpenAI-compatible endpoints
pub struct OpenAiCompatibleAdapter {
    client: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn authorize(
        &self,
        builder: reqwest::RequestBuilder,
        provider: &Provider,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        if api_key.is_empty() {
            // local endpoints (ollama) run without credentials
            return builder;
        }
        match provider.provider_type {
            ProviderType::Azure => builder.header("api-key", api_key),
            _ => builder.bearer_auth(api_key),
        }
    }

    fn chat_body(&self, request: &ChatRequest, model: &Model, stream: bool) -> Result<Value> {
        let mut body = serde_json::to_value(request)?;
        let object = body
            .as_object_mut()
            .ok_or_else(|| GatewayError::Internal("chat request is not an object".to_string()))?;
        object.insert("model".to_string(), Value::String(model.id.clone()));
        if stream {
            object.insert("stream".to_string(), Value::Bool(true));
        }
        Ok(body)
    }
}

impl Default for OpenAiCompatibleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Surface a non-2xx response as an upstream failure with its body attached.
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
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    async fn health_check(&self, provider: &Provider) -> Result<()> {
        let response = self
            .authorize(
                self.client
                    .get(endpoint(provider, "models"))
                    .timeout(Duration::from_secs(10)),
                provider,
                &provider.api_key,
            )
            .send()
            .await?;
        check_status(response, provider).await.map(|_| ())
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        model: &Model,
        provider: &Provider,
        api_key: &str,
    ) -> Result<ChatResponse> {
        let body = self.chat_body(request, model, false)?;
        debug!(model = %model.id, provider = %provider.id, "chat completion request");

        let response = self
            .authorize(
                self.client
                    .post(endpoint(provider, "chat/completions"))
                    .timeout(REQUEST_TIMEOUT),
                provider,
                api_key,
            )
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, provider).await?;
        Ok(response.json().await?)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        model: &Model,
        provider: &Provider,
        api_key: &str,
    ) -> Result<ChatStream> {
        let body = self.chat_body(request, model, true)?;
        let provider_id = provider.id.clone();

        let response = self
            .authorize(
                self.client.post(endpoint(provider, "chat/completions")),
                provider,
                api_key,
            )
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, provider).await?;

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| {
                    GatewayError::Upstream(format!(
                        "stream from provider {} failed: {}",
                        provider_id, e
                    ))
                })?;
                for event in decoder.feed(&chunk) {
                    if event.data == "[DONE]" {
                        return;
                    }
                    if event.data.is_empty() {
                        continue;
                    }
                    let parsed: crate::core::types::ChatChunk =
                        serde_json::from_str(&event.data)?;
                    yield parsed;
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn embed(
        &self,
        request: &EmbeddingRequest,
        model: &Model,
        provider: &Provider,
        api_key: &str,
    ) -> Result<EmbeddingResponse> {
        let body = json!({
            "model": model.id,
            "input": request.input,
        });
        let response = self
            .authorize(
                self.client
                    .post(endpoint(provider, "embeddings"))
                    .timeout(REQUEST_TIMEOUT),
                provider,
                api_key,
            )
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, provider).await?;
        Ok(response.json().await?)
    }

    async fn generate_image(
        &self,
        request: &ImageGenerationRequest,
        model: &Model,
        provider: &Provider,
        api_key: &str,
    ) -> Result<ImageGenerationResponse> {
        let mut body = json!({
            "model": model.id,
            "prompt": request.prompt,
        });
        if let Some(n) = request.n {
            body["n"] = json!(n);
        }
        if let Some(size) = &request.size {
            body["size"] = json!(size);
        }

        let response = self
            .authorize(
                self.client
                    .post(endpoint(provider, "images/generations"))
                    .timeout(REQUEST_TIMEOUT),
                provider,
                api_key,
            )
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, provider).await?;
        Ok(response.json().await?)
    }

    async fn generate_video(
        &self,
        request: &VideoGenerationRequest,
        model: &Model,
        provider: &Provider,
        api_key: &str,
    ) -> Result<VideoSubmission> {
        let mut body = json!({
            "model": model.id,
            "prompt": request.prompt,
        });
        if let Some(seconds) = request.duration_seconds {
            body["seconds"] = json!(seconds.to_string());
        }
        if let Some(size) = &request.size {
            body["size"] = json!(size);
        }

        let response = self
            .authorize(
                self.client
                    .post(endpoint(provider, "videos"))
                    .timeout(REQUEST_TIMEOUT),
                provider,
                api_key,
            )
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, provider).await?;
        let body: Value = response.json().await?;

        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::Upstream(format!(
                    "provider {} video response missing job id",
                    provider.id
                ))
            })?
            .to_string();
        Ok(VideoSubmission {
            external_task_id: id,
        })
    }

    async fn get_video_status(
        &self,
        external_task_id: &str,
        provider: &Provider,
        api_key: &str,
    ) -> Result<VideoStatus> {
        let response = self
            .authorize(
                self.client
                    .get(endpoint(provider, &format!("videos/{}", external_task_id)))
                    .timeout(Duration::from_secs(30)),
                provider,
                api_key,
            )
            .send()
            .await?;
        let response = check_status(response, provider).await?;
        let body: Value = response.json().await?;

        let status = body.get("status").and_then(Value::as_str).unwrap_or("");
        let progress = body
            .get("progress")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .min(100) as u8;

        Ok(match status {
            "completed" => VideoStatus {
                progress: 100,
                completed: true,
                output: Some(body),
                error: None,
            },
            "failed" => {
                let message = body
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("video job failed")
                    .to_string();
                VideoStatus {
                    progress,
                    completed: false,
                    output: None,
                    error: Some(message),
                }
            }
            _ => VideoStatus {
                progress,
                completed: false,
                output: None,
                error: None,
            },
        })
    }
}
