//! Transcript sink — fire-and-forget conversation archival.
//!
//! When the conversation manager resets (explicit reset, inactivity), it
//! hands the full history to a `TranscriptSink`. Sinks must never block
//! the caller and must swallow their own I/O failures; the engine's
//! contract ends at `record()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::PromptMessage;

/// A saved conversation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Why the conversation was saved ("reset", "inactivity", ...)
    pub reason: String,

    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,

    /// The full ordered history, system turn first
    pub turns: Vec<PromptMessage>,
}

/// Trait for transcript sinks (where saved conversations go).
///
/// `record` is fire-and-forget: implementations queue the transcript and
/// return immediately, serializing any file I/O internally.
pub trait TranscriptSink: Send + Sync {
    fn record(&self, transcript: Transcript);
}

/// A sink that discards transcripts. Used in tests and when archival is
/// not configured.
pub struct NoopSink;

impl TranscriptSink for NoopSink {
    fn record(&self, _transcript: Transcript) {}
}

/// An in-memory sink that collects transcripts. Useful for testing.
#[derive(Default)]
pub struct CollectingSink {
    transcripts: std::sync::Mutex<Vec<Transcript>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded transcripts, in order.
    pub fn transcripts(&self) -> Vec<Transcript> {
        self.transcripts.lock().unwrap().clone()
    }

    /// Count of recorded transcripts.
    pub fn count(&self) -> usize {
        self.transcripts.lock().unwrap().len()
    }
}

impl TranscriptSink for CollectingSink {
    fn record(&self, transcript: Transcript) {
        self.transcripts.lock().unwrap().push(transcript);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_records() {
        let sink = CollectingSink::new();
        sink.record(Transcript {
            reason: "inactivity".into(),
            saved_at: Utc::now(),
            turns: vec![
                PromptMessage::system("persona"),
                PromptMessage::user("[Alice] hi"),
            ],
        });

        assert_eq!(sink.count(), 1);
        let saved = sink.transcripts();
        assert_eq!(saved[0].reason, "inactivity");
        assert_eq!(saved[0].turns.len(), 2);
    }

    #[test]
    fn noop_sink_accepts_anything() {
        let sink = NoopSink;
        sink.record(Transcript {
            reason: "reset".into(),
            saved_at: Utc::now(),
            turns: vec![],
        });
    }

    #[test]
    fn transcript_serialization() {
        let t = Transcript {
            reason: "reset".into(),
            saved_at: Utc::now(),
            turns: vec![PromptMessage::system("p")],
        };
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("reset"));
        let back: Transcript = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turns.len(), 1);
    }
}
