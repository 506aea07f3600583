//! Provider router — selects the correct LLM provider based on config.
//!
//! Handles provider creation and routing requests to the right backend.

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use purrgate_core::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Build the provider router from configuration.
///
/// The `anthropic` provider uses the native Messages API; everything
/// else goes through the OpenAI-compatible endpoint.
pub fn build_from_config(config: &purrgate_config::ProviderConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.provider);
    let api_key = config.api_key.clone().unwrap_or_default();
    let base_url = config
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(&config.provider));

    let provider: Arc<dyn Provider> = if config.provider == "anthropic" {
        let mut p = AnthropicProvider::new(&api_key);
        if config.api_url.is_some() {
            p = p.with_base_url(&base_url);
        }
        Arc::new(p)
    } else {
        Arc::new(OpenAiCompatProvider::new(
            &config.provider,
            &base_url,
            &api_key,
        ))
    };

    router.register(config.provider.clone(), provider);
    router
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "anthropic" => "https://api.anthropic.com".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
