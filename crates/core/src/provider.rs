//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send an assembled prompt to an LLM and get a
//! reply back, either as a complete message or as a stream of chunks.
//!
//! Implementations: Anthropic native, OpenAI-compatible, custom endpoints.

use crate::error::ProviderError;
use crate::message::PromptMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,

    /// The assembled prompt turns, in order
    pub messages: Vec<PromptMessage>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated reply text
    pub content: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The dispatcher calls
/// `stream()` first and falls back to `complete()` on stream error,
/// without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.content),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PromptMessage;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ProviderResponse {
                content: last,
                usage: None,
                model: request.model,
            })
        }
    }

    #[test]
    fn provider_request_defaults() {
        let req = ProviderRequest {
            model: "gpt-4o".into(),
            messages: vec![],
            temperature: default_temperature(),
            max_tokens: None,
            stream: false,
            stop: vec![],
        };
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(!req.stream);
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let provider = EchoProvider;
        let mut rx = provider
            .stream(ProviderRequest {
                model: "echo-1".into(),
                messages: vec![PromptMessage::user("meow")],
                temperature: 0.7,
                max_tokens: None,
                stream: true,
                stop: vec![],
            })
            .await
            .unwrap();

        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("meow"));
        assert!(chunk.done);
    }
}
