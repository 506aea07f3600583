//! # Purrgate Core
//!
//! Domain types, traits, and error definitions for the Purrgate NPC
//! engagement gateway. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem boundary is defined as a trait here. Implementations
//! live in their respective crates. This enables:
//! - Swapping LLM providers and memory stores via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod persona;
pub mod provider;
pub mod token;
pub mod transcript;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use memory::{MemoryEntry, MemoryStore};
pub use message::{PromptMessage, Role, Utterance};
pub use persona::{Persona, PersonaFact};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use transcript::{Transcript, TranscriptSink};
