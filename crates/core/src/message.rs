//! Utterance and prompt message domain types.
//!
//! These are the core value objects that flow through the system:
//! a speaker says something in the room → the engine buffers it as an
//! `Utterance` → the conversation manager renders `PromptMessage` turns →
//! the provider sends them to the LLM.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a turn in the prompt sent to the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (persona, memories, address hints)
    System,
    /// A room speaker (prefixed with their display name)
    User,
    /// The NPC persona's reply
    Assistant,
}

/// A single turn in the prompt wire format: `{role, content}`.
///
/// The engine passes these verbatim to the provider; it does not reshape
/// the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single utterance from one speaker at one moment.
///
/// Immutable after creation. The `direct_mention` flag is computed at
/// ingest time by the decision layer's trigger-word matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// Unique utterance ID
    pub id: String,

    /// Stable identity of the speaker (opaque string)
    pub avatar_id: String,

    /// The speaker's display name
    pub speaker: String,

    /// The raw text
    pub text: String,

    /// When the utterance was received
    pub received_at: DateTime<Utc>,

    /// Whether the text contained a configured trigger word
    pub direct_mention: bool,
}

impl Utterance {
    /// Create a new utterance received now.
    pub fn new(
        avatar_id: impl Into<String>,
        speaker: impl Into<String>,
        text: impl Into<String>,
        direct_mention: bool,
    ) -> Self {
        Self::at(avatar_id, speaker, text, direct_mention, Utc::now())
    }

    /// Create an utterance with an explicit receipt time (tests use this
    /// to make timing deterministic).
    pub fn at(
        avatar_id: impl Into<String>,
        speaker: impl Into<String>,
        text: impl Into<String>,
        direct_mention: bool,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            avatar_id: avatar_id.into(),
            speaker: speaker.into(),
            text: text.into(),
            received_at,
            direct_mention,
        }
    }

    /// Age of this utterance relative to `now`, in milliseconds.
    /// Clock skew (utterance newer than `now`) counts as age zero.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.received_at).num_milliseconds().max(0)
    }
}
