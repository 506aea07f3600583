//! LLM Provider implementations for Purrgate.
//!
//! All providers implement the `purrgate_core::Provider` trait.
//! The router selects the correct provider based on configuration.

pub mod anthropic;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::ProviderRouter;
