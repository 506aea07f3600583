//! Memory trait — keyword-indexed long-term facts for prompt injection.
//!
//! The memory store holds persona facts keyed by lowercase keywords.
//! When recent conversation text matches a keyword, the entry becomes a
//! candidate for injection into the prompt, subject to a token budget.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single long-term memory entry.
///
/// Keywords and content are immutable after creation; only the access
/// bookkeeping (`last_accessed`, `access_count`) changes over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID for this memory
    pub id: String,

    /// Lowercase, trimmed keywords that activate this entry
    pub keywords: Vec<String>,

    /// The content injected into the prompt when activated
    pub content: String,

    /// Priority 1–10 (higher = stronger)
    pub priority: u8,

    /// When this memory was created
    pub created_at: DateTime<Utc>,

    /// When this memory was last injected into a prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,

    /// How many times this memory has been injected
    #[serde(default)]
    pub access_count: u64,
}

impl MemoryEntry {
    /// Create a new entry. Keywords are lowercased and trimmed; empty
    /// keywords are dropped. Priority is clamped to 1–10.
    pub fn new(keywords: Vec<String>, content: impl Into<String>, priority: u8) -> Self {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            id: Uuid::new_v4().to_string(),
            keywords,
            content: content.into(),
            priority: priority.clamp(1, 10),
            created_at: Utc::now(),
            last_accessed: None,
            access_count: 0,
        }
    }
}

/// The memory store trait.
///
/// Implementations must never block the engine: all operations are
/// bounded in-memory work. Ranking and budget math are specified on the
/// `relevant` method.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store a new entry, returning its generated ID.
    async fn add(&self, keywords: Vec<String>, content: String, priority: u8) -> String;

    /// Find the entries relevant to `recent_texts`, ranked by score
    /// descending, whose cumulative estimated token cost fits within
    /// `token_budget`. Updates access bookkeeping for each returned entry.
    ///
    /// Score = priority×10 + matched-keyword-count×5 + (accessed before ? 2 : 0).
    async fn relevant(&self, recent_texts: &[String], token_budget: usize) -> Vec<MemoryEntry>;

    /// Remove an entry by ID. Returns whether it existed.
    async fn remove(&self, id: &str) -> bool;

    /// Drop all entries.
    async fn clear(&self);

    /// Number of stored entries.
    async fn count(&self) -> usize;

    /// Fetch a single entry by ID.
    async fn get(&self, id: &str) -> Option<MemoryEntry>;

    /// All entries, in insertion order.
    async fn all(&self) -> Vec<MemoryEntry>;
}
