//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Fireworks
//! AI, and any OpenAI-compatible endpoint.
//!
//! Supports chat completions, non-streaming and streaming SSE.

use async_trait::async_trait;
use futures::StreamExt;
use purrgate_core::error::ProviderError;
use purrgate_core::message::{PromptMessage, Role};
use purrgate_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
///
/// This handles the vast majority of LLM providers since most expose
/// an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert our PromptMessage types to OpenAI API format.
    fn to_api_messages(messages: &[PromptMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn check_status(status: u16, error_body: String) -> Result<(), ProviderError> {
        match status {
            200 => Ok(()),
            429 => Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            }),
            401 | 403 => Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            )),
            _ => {
                warn!(status, body = %error_body, "Provider returned error");
                Err(ProviderError::ApiError {
                    status_code: status,
                    message: error_body,
                })
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::check_status(status, error_body)
                .expect_err("non-200 status always yields an error"));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::check_status(status, error_body)
                .expect_err("non-200 status always yields an error"));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and parse chunks.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    // Skip empty lines and SSE comments
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    if let Some(data) = line.strip_prefix("data: ") {
                        let data = data.trim();

                        // "[DONE]" signals end of stream
                        if data == "[DONE]" {
                            let _ = tx
                                .send(Ok(StreamChunk {
                                    content: None,
                                    done: true,
                                    usage: None,
                                }))
                                .await;
                            return;
                        }

                        match serde_json::from_str::<StreamResponse>(data) {
                            Ok(stream_resp) => {
                                if let Some(choice) = stream_resp.choices.first() {
                                    let has_content = choice
                                        .delta
                                        .content
                                        .as_ref()
                                        .is_some_and(|c| !c.is_empty());
                                    if has_content {
                                        let chunk = StreamChunk {
                                            content: choice.delta.content.clone(),
                                            done: false,
                                            usage: None,
                                        };
                                        if tx.send(Ok(chunk)).await.is_err() {
                                            return; // receiver dropped
                                        }
                                    }
                                }

                                // Usage arrives in the final stream chunk
                                // (stream_options.include_usage).
                                if let Some(usage) = stream_resp.usage {
                                    let chunk = StreamChunk {
                                        content: None,
                                        done: true,
                                        usage: Some(Usage {
                                            prompt_tokens: usage.prompt_tokens,
                                            completion_tokens: usage.completion_tokens,
                                            total_tokens: usage.total_tokens,
                                        }),
                                    };
                                    let _ = tx.send(Ok(chunk)).await;
                                    return;
                                }
                            }
                            Err(e) => {
                                trace!(
                                    provider = %provider_name,
                                    data = %data,
                                    error = %e,
                                    "Ignoring unparseable SSE chunk"
                                );
                            }
                        }
                    }
                }
            }

            // Stream ended without [DONE] — send final chunk
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    done: true,
                    usage: None,
                }))
                .await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
