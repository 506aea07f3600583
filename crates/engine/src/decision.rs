//! The decision layer — priority scoring and target selection.
//!
//! Pure computation over a buffer snapshot: never blocks, never fails.
//! Randomness is injected through `RandomSource` so that verdicts are
//! reproducible under a stubbed source.

use chrono::{DateTime, Utc};
use purrgate_config::ScoreConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::buffer::SpeakerBuffer;

/// Scores within this window of a reply count as an active conversation.
const ACTIVE_CONVERSATION_MS: i64 = 30_000;
/// Recent-interaction bonus applies up to one hour after a reply.
const RECENT_INTERACTION_MS: i64 = 3_600_000;
/// Bonus for an interaction inside the active-conversation window.
const ACTIVE_CONVERSATION_BONUS: f64 = 60.0;
/// Consecutive-message accounting is bounded to keep scoring O(1).
const MAX_CONSECUTIVE_TRACKED: usize = 5;
/// Only the first few consecutive messages earn the bonus.
const MAX_CONSECUTIVE_REWARDED: usize = 3;

/// A source of uniform random values in `[0, 1)`.
pub trait RandomSource: Send {
    fn next(&mut self) -> f64;
}

/// Production randomness backed by the thread-local RNG.
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn next(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// A fixed value, for deterministic tests.
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next(&mut self) -> f64 {
        self.0
    }
}

/// Why the decision layer declined (or that it responded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Responded,
    Empty,
    BelowThreshold,
    ChanceRejected,
    Cooldown,
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Responded => "responded",
            Self::Empty => "empty",
            Self::BelowThreshold => "below_threshold",
            Self::ChanceRejected => "chance_rejected",
            Self::Cooldown => "cooldown",
        };
        write!(f, "{tag}")
    }
}

/// The outcome of one scoring pass.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether to respond at all
    pub respond: bool,

    /// The chosen target, when responding
    pub target: Option<String>,

    /// Why this verdict was reached
    pub reason: DecisionReason,

    /// The numeric score of the best candidate
    pub score: f64,
}

impl Decision {
    fn ignore(reason: DecisionReason, score: f64) -> Self {
        Self {
            respond: false,
            target: None,
            reason,
            score,
        }
    }
}

/// Scores speaker buffers and selects at most one response target.
pub struct DecisionEngine {
    config: ScoreConfig,
    /// Last time a respond verdict was issued per speaker. This is the
    /// cooldown gate, recorded at decision time. The buffer's
    /// `last_responded_at` (recency bonus) is recorded at reply time;
    /// the two play different roles and stay distinct.
    last_response: HashMap<String, DateTime<Utc>>,
    rng: Box<dyn RandomSource>,
}

impl DecisionEngine {
    pub fn new(config: ScoreConfig, rng: Box<dyn RandomSource>) -> Self {
        Self {
            config,
            last_response: HashMap::new(),
            rng,
        }
    }

    /// True iff the lowercase text contains any configured trigger word.
    pub fn detect_mention(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.config
            .trigger_words
            .iter()
            .any(|w| lower.contains(w.as_str()))
    }

    /// Forget the cooldown bookkeeping (used by reset).
    pub fn clear_history(&mut self) {
        self.last_response.clear();
    }

    /// Evaluate every speaker buffer and return the verdict for this tick.
    pub fn decide(&mut self, snapshot: &[&SpeakerBuffer], now: DateTime<Utc>) -> Decision {
        let candidates: Vec<&SpeakerBuffer> = snapshot
            .iter()
            .copied()
            .filter(|b| !b.is_empty())
            .collect();
        if candidates.is_empty() {
            return Decision::ignore(DecisionReason::Empty, 0.0);
        }

        // Highest score wins; equal scores go to the speaker that entered
        // the buffer set first. The snapshot arrives in insertion order,
        // so a strict `>` comparison preserves that.
        let mut best: Option<(&SpeakerBuffer, f64)> = None;
        for buffer in candidates {
            let score = self.score_buffer(buffer, now);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((buffer, score)),
            }
        }
        let (target, best_score) = best.expect("at least one candidate");

        if best_score < self.config.response_threshold {
            return Decision::ignore(DecisionReason::BelowThreshold, best_score);
        }

        if self.rng.next() >= self.config.response_chance {
            return Decision::ignore(DecisionReason::ChanceRejected, best_score);
        }

        // Cooldown, bypassed when the speaker has a multi-message backlog
        // (an active conversation should keep flowing).
        let in_cooldown = target.len() <= 1
            && self.last_response.get(&target.avatar_id).is_some_and(|t| {
                (now - *t).num_milliseconds() < self.config.avatar_cooldown_ms as i64
            });
        if in_cooldown {
            return Decision::ignore(DecisionReason::Cooldown, best_score);
        }

        self.last_response.insert(target.avatar_id.clone(), now);
        debug!(
            target = %target.avatar_id,
            score = best_score,
            "Decision: respond"
        );
        Decision {
            respond: true,
            target: Some(target.avatar_id.clone()),
            reason: DecisionReason::Responded,
            score: best_score,
        }
    }

    /// Priority score for one speaker's buffer.
    fn score_buffer(&mut self, buffer: &SpeakerBuffer, now: DateTime<Utc>) -> f64 {
        let mut score = 0.0;

        // 1. Direct mention dominates everything else.
        if buffer.has_mention() {
            score += self.config.direct_mention_bonus;
        }

        // 2. Recency tier from the last actual reply to this speaker.
        if let Some(last) = buffer.last_responded_at {
            let since_ms = (now - last).num_milliseconds();
            if since_ms <= ACTIVE_CONVERSATION_MS {
                score += ACTIVE_CONVERSATION_BONUS;
            } else if since_ms <= RECENT_INTERACTION_MS {
                score += self.config.recent_interaction_bonus;
            }
        }

        // 3. Backlog size.
        score += buffer.len() as f64 * self.config.message_count_multiplier;

        // 4. Consecutive-run bonus.
        let consecutive = buffer.len().min(MAX_CONSECUTIVE_TRACKED);
        score += consecutive.min(MAX_CONSECUTIVE_REWARDED) as f64 * self.config.consecutive_bonus;

        // 5. Age decay: stale pending chatter loses urgency.
        let age_minutes = (now - buffer.first_seen).num_milliseconds().max(0) as f64 / 60_000.0;
        score -= (age_minutes * self.config.time_decay_rate).min(self.config.max_time_decay);

        // 6. Randomness keeps the persona from feeling mechanical.
        if self.config.randomness_range > 0.0 {
            score += self.rng.next() * self.config.randomness_range;
        }

        score.max(0.0)
    }
}
