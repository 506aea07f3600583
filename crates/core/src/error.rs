//! Error types for the Purrgate domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Purrgate operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine is disabled")]
    Disabled,

    #[error("No decision within {waited_ms}ms for avatar {avatar_id}")]
    DecisionTimeout { avatar_id: String, waited_ms: u64 },

    #[error("Unexpected state: expected {expected}, found {found}")]
    UnexpectedState { expected: String, found: String },

    #[error("Persona file error: {0}")]
    Persona(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Invalid entry: {0}")]
    Invalid(String),
}
