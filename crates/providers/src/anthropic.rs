//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via SSE with `content_block_delta` events

use async_trait::async_trait;
use futures::StreamExt;
use purrgate_core::error::ProviderError;
use purrgate_core::message::{PromptMessage, Role};
use purrgate_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts the system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[PromptMessage]) -> (Option<String>, Vec<&PromptMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&PromptMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic API format.
    fn to_api_messages(messages: &[&PromptMessage]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    Role::Assistant => "assistant".into(),
                    _ => "user".into(),
                },
                content: msg.content.clone(),
            })
            .collect()
    }

    fn build_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let api_messages = Self::to_api_messages(&messages);
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": max_tokens,
            "temperature": request.temperature,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }
        body
    }

    fn check_status(status: u16, error_body: String) -> Result<(), ProviderError> {
        match status {
            200 => Ok(()),
            429 => Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            }),
            401 | 403 => Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            )),
            _ => {
                warn!(status, body = %error_body, "Anthropic API error");
                Err(ProviderError::ApiError {
                    status_code: status,
                    message: error_body,
                })
            }
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request, false);

        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        let api_resp: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(Self::to_provider_response(api_resp))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request, true);

        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut input_tokens: Option<u64> = None;
            let mut output_tokens: Option<u64> = None;

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

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    if let Some(event_type) = line.strip_prefix("event: ") {
                        if event_type.trim() == "message_stop" {
                            let usage = match (input_tokens, output_tokens) {
                                (Some(inp), Some(out)) => Some(Usage {
                                    prompt_tokens: inp as u32,
                                    completion_tokens: out as u32,
                                    total_tokens: (inp + out) as u32,
                                }),
                                _ => None,
                            };
                            let _ = tx
                                .send(Ok(StreamChunk {
                                    content: None,
                                    done: true,
                                    usage,
                                }))
                                .await;
                            return;
                        }
                        continue;
                    }

                    if let Some(data) = line.strip_prefix("data: ") {
                        let data = data.trim();
                        if data.is_empty() {
                            continue;
                        }

                        let event: serde_json::Value = match serde_json::from_str(data) {
                            Ok(v) => v,
                            Err(e) => {
                                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                                continue;
                            }
                        };

                        match event["type"].as_str().unwrap_or("") {
                            "message_start" => {
                                if let Some(inp) =
                                    event["message"]["usage"]["input_tokens"].as_u64()
                                {
                                    input_tokens = Some(inp);
                                }
                            }
                            "content_block_delta" => {
                                let delta = &event["delta"];
                                if delta["type"].as_str() == Some("text_delta") {
                                    if let Some(text) = delta["text"].as_str() {
                                        let chunk = StreamChunk {
                                            content: Some(text.to_string()),
                                            done: false,
                                            usage: None,
                                        };
                                        if tx.send(Ok(chunk)).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                            "message_delta" => {
                                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                                    output_tokens = Some(out);
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }

            // Stream ended without message_stop — send final chunk
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
        // A minimal request verifies reachability and the API key.
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": "claude-haiku-35-20241022",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success() || response.status().as_u16() != 401)
    }
}

impl AnthropicProvider {
    /// Convert an Anthropic API response to our ProviderResponse.
    fn to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut content = String::new();
        for block in &resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(text);
                }
            }
        }

        let usage = Some(Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        });

        ProviderResponse {
            content,
            usage,
            model: resp.model,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider =
            AnthropicProvider::new("sk-ant-test").with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn system_extraction() {
        let messages = vec![
            PromptMessage::system("You are the maid"),
            PromptMessage::system("[Memory] Tea at four."),
            PromptMessage::user("[Carol] hello"),
            PromptMessage::assistant("Hi!"),
        ];

        let (system, non_system) = AnthropicProvider::extract_system(&messages);
        assert_eq!(
            system.as_deref(),
            Some("You are the maid\n\n[Memory] Tea at four.")
        );
        assert_eq!(non_system.len(), 2);
        assert_eq!(non_system[0].role, Role::User);
        assert_eq!(non_system[1].role, Role::Assistant);
    }

    #[test]
    fn system_extraction_no_system() {
        let messages = vec![PromptMessage::user("Hello")];
        let (system, non_system) = AnthropicProvider::extract_system(&messages);
        assert!(system.is_none());
        assert_eq!(non_system.len(), 1);
    }

    #[test]
    fn message_conversion_roles() {
        let messages = vec![
            PromptMessage::user("[Carol] hello"),
            PromptMessage::assistant("Hi!"),
        ];
        let refs: Vec<&PromptMessage> = messages.iter().collect();
        let api_msgs = AnthropicProvider::to_api_messages(&refs);
        assert_eq!(api_msgs.len(), 2);
        assert_eq!(api_msgs[0].role, "user");
        assert_eq!(api_msgs[1].role, "assistant");
    }

    #[test]
    fn body_includes_system_and_stream_flag() {
        let provider = AnthropicProvider::new("sk-test");
        let request = ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![
                PromptMessage::system("persona"),
                PromptMessage::user("[Carol] hi"),
            ],
            temperature: 0.7,
            max_tokens: Some(256),
            stream: true,
            stop: vec!["END".into()],
        };
        let body = provider.build_body(&request, true);
        assert_eq!(body["system"], "persona");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stop_sequences"][0], "END");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn parse_text_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_01",
                "model": "claude-sonnet-4-20250514",
                "content": [{"type": "text", "text": "Nya~ hello!"}],
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "stop_reason": "end_turn"
            }"#,
        )
        .unwrap();

        let pr = AnthropicProvider::to_provider_response(resp);
        assert_eq!(pr.content, "Nya~ hello!");
        assert_eq!(pr.usage.unwrap().total_tokens, 15);
        assert_eq!(pr.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            AnthropicProvider::check_status(429, String::new()),
            Err(ProviderError::RateLimited { .. })
        ));
        assert!(matches!(
            AnthropicProvider::check_status(401, String::new()),
            Err(ProviderError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            AnthropicProvider::check_status(500, "oops".into()),
            Err(ProviderError::ApiError {
                status_code: 500,
                ..
            })
        ));
        assert!(AnthropicProvider::check_status(200, String::new()).is_ok());
    }
}
