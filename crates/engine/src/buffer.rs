//! Per-speaker message buffering.
//!
//! Each speaker gets a FIFO queue of recent utterances plus metadata.
//! Rapid successive utterances inside the aggregation window are treated
//! as one logical message; stale utterances expire; per-speaker and
//! global caps bound memory. Eviction is oldest-first, never score-based
//! (scoring is the decision layer's job).

use chrono::{DateTime, Utc};
use purrgate_config::BufferConfig;
use purrgate_core::Utterance;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// The queue and metadata the engine keeps for one speaker.
///
/// The metadata record outlives the queue: clearing a speaker after a
/// reply keeps `last_responded_at` so the recency bonus survives. Only
/// the expiry sweep removes the record, and only when the speaker was
/// never replied to.
#[derive(Debug, Clone)]
pub struct SpeakerBuffer {
    /// Stable identity of the speaker
    pub avatar_id: String,

    /// Latest display name seen for this speaker
    pub speaker: String,

    /// Buffered utterances, oldest first
    messages: VecDeque<Utterance>,

    /// When the current pending burst started (reset when an ingest finds
    /// the queue empty)
    pub first_seen: DateTime<Utc>,

    /// When the most recent utterance arrived
    pub last_seen: DateTime<Utc>,

    /// Total utterances ever ingested for this speaker
    pub total_ingested: u64,

    /// When the engine last replied to this speaker
    pub last_responded_at: Option<DateTime<Utc>>,

    /// Insertion order into the buffer set; ties in decision scoring
    /// resolve to the lowest sequence
    pub seq: u64,
}

impl SpeakerBuffer {
    fn new(avatar_id: String, speaker: String, now: DateTime<Utc>, seq: u64) -> Self {
        Self {
            avatar_id,
            speaker,
            messages: VecDeque::new(),
            first_seen: now,
            last_seen: now,
            total_ingested: 0,
            last_responded_at: None,
            seq,
        }
    }

    /// Buffered utterances, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &Utterance> {
        self.messages.iter()
    }

    /// Number of buffered utterances.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether any buffered utterance carries the direct-mention flag.
    pub fn has_mention(&self) -> bool {
        self.messages.iter().any(|u| u.direct_mention)
    }
}

/// The buffer set: a mapping from speaker identity to speaker buffer.
pub struct MessageBuffer {
    config: BufferConfig,
    buffers: HashMap<String, SpeakerBuffer>,
    next_seq: u64,
}

impl MessageBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            buffers: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Append a new utterance to the speaker's buffer, creating the
    /// buffer on first contact. Enforces the per-speaker cap, sweeps
    /// expired utterances, then enforces the global cap by evicting the
    /// globally-oldest utterance until within bounds.
    pub fn ingest(
        &mut self,
        avatar_id: &str,
        speaker: &str,
        text: &str,
        direct_mention: bool,
        now: DateTime<Utc>,
    ) -> Utterance {
        if !self.buffers.contains_key(avatar_id) {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.buffers.insert(
                avatar_id.to_string(),
                SpeakerBuffer::new(avatar_id.to_string(), speaker.to_string(), now, seq),
            );
        }
        let entry = self
            .buffers
            .get_mut(avatar_id)
            .expect("buffer entry exists after insert");

        // A fresh burst: the queue drained since we last saw this speaker.
        if entry.messages.is_empty() {
            entry.first_seen = now;
        }

        let utterance = Utterance::at(avatar_id, speaker, text, direct_mention, now);
        entry.speaker = speaker.to_string();
        entry.last_seen = now;
        entry.total_ingested += 1;
        entry.messages.push_back(utterance.clone());

        if entry.messages.len() > self.config.max_per_avatar {
            let dropped = entry.messages.pop_front();
            trace!(
                avatar_id,
                dropped_id = dropped.map(|u| u.id).as_deref(),
                "Per-speaker cap exceeded, oldest utterance dropped"
            );
        }

        self.sweep_expired(now);
        self.enforce_global_cap();

        utterance
    }

    /// Concatenate the speaker's utterances inside the aggregation window
    /// (single-space separated, insertion order). A lone older utterance
    /// is never silently dropped: when nothing is inside the window but
    /// the buffer is non-empty, the newest utterance is returned.
    pub fn aggregated_content(&self, avatar_id: &str, now: DateTime<Utc>) -> Option<String> {
        let buffer = self.buffers.get(avatar_id)?;
        if buffer.messages.is_empty() {
            return None;
        }

        let window_ms = self.config.aggregation_window_ms as i64;
        let recent: Vec<&str> = buffer
            .messages
            .iter()
            .filter(|u| u.age_ms(now) <= window_ms)
            .map(|u| u.text.as_str())
            .collect();

        if recent.is_empty() {
            return buffer.messages.back().map(|u| u.text.clone());
        }
        Some(recent.join(" "))
    }

    /// Drop all utterances for a speaker but keep the metadata record.
    pub fn clear_speaker(&mut self, avatar_id: &str) {
        if let Some(buffer) = self.buffers.get_mut(avatar_id) {
            buffer.messages.clear();
        }
    }

    /// Drop everything including metadata.
    pub fn clear_all(&mut self) {
        self.buffers.clear();
    }

    /// Record that the engine replied to this speaker.
    pub fn mark_responded(&mut self, avatar_id: &str, now: DateTime<Utc>) {
        if let Some(buffer) = self.buffers.get_mut(avatar_id) {
            buffer.last_responded_at = Some(now);
        }
    }

    /// Remove utterances older than the expiry age. A speaker's record is
    /// removed entirely iff its queue is empty and it was never replied
    /// to.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) {
        let expiry_ms = self.config.expiry_ms as i64;
        let mut removed = 0usize;
        for buffer in self.buffers.values_mut() {
            let before = buffer.messages.len();
            buffer.messages.retain(|u| u.age_ms(now) <= expiry_ms);
            removed += before - buffer.messages.len();
        }
        self.buffers
            .retain(|_, b| !(b.messages.is_empty() && b.last_responded_at.is_none()));
        if removed > 0 {
            debug!(removed, "Expired utterances swept");
        }
    }

    /// Read-only view of all speaker buffers, in insertion order.
    pub fn snapshot(&self) -> Vec<&SpeakerBuffer> {
        let mut buffers: Vec<&SpeakerBuffer> = self.buffers.values().collect();
        buffers.sort_by_key(|b| b.seq);
        buffers
    }

    /// Look up one speaker's buffer.
    pub fn get(&self, avatar_id: &str) -> Option<&SpeakerBuffer> {
        self.buffers.get(avatar_id)
    }

    /// Total utterance count across all speakers.
    pub fn total_count(&self) -> usize {
        self.buffers.values().map(|b| b.messages.len()).sum()
    }

    /// Whether any speaker has buffered utterances.
    pub fn has_buffered(&self) -> bool {
        self.buffers.values().any(|b| !b.messages.is_empty())
    }

    /// Evict the globally-oldest utterance until within the global cap.
    /// Eviction keeps the metadata record even when it empties a queue.
    fn enforce_global_cap(&mut self) {
        while self.total_count() > self.config.max_total_size {
            let oldest = self
                .buffers
                .values()
                .filter_map(|b| b.messages.front().map(|u| (b.avatar_id.clone(), u.received_at)))
                .min_by_key(|(_, at)| *at);

            match oldest {
                Some((avatar_id, _)) => {
                    if let Some(buffer) = self.buffers.get_mut(&avatar_id) {
                        let evicted = buffer.messages.pop_front();
                        trace!(
                            avatar_id = %avatar_id,
                            evicted_id = evicted.map(|u| u.id).as_deref(),
                            "Global cap exceeded, oldest utterance evicted"
                        );
                    }
                }
                None => break,
            }
        }
    }
}
