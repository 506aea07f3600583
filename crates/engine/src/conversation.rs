//! Conversation history and prompt assembly.
//!
//! The manager owns the ordered dialogue history. The persona system turn
//! is always first and is never trimmed. Prompt assembly fits the newest
//! turns into the context token budget, optionally injecting relevant
//! long-term memories as system turns right after the persona turn.

use chrono::{DateTime, Duration, Utc};
use purrgate_config::ConversationConfig;
use purrgate_core::memory::MemoryStore;
use purrgate_core::token::{estimate_turn_tokens, estimate_turns_tokens};
use purrgate_core::transcript::{Transcript, TranscriptSink};
use purrgate_core::PromptMessage;
use std::sync::Arc;
use tracing::{debug, warn};

/// How many recent turns feed the memory keyword search.
const MEMORY_SEARCH_TURNS: usize = 5;

/// Prefix rendering a memory entry as a prompt turn.
const MEMORY_PREFIX: &str = "[Memory] ";

/// The conversation manager.
pub struct ConversationManager {
    config: ConversationConfig,
    history: Vec<PromptMessage>,
    inactivity_deadline: Option<DateTime<Utc>>,
    sink: Arc<dyn TranscriptSink>,
}

impl ConversationManager {
    pub fn new(
        system_prompt: impl Into<String>,
        config: ConversationConfig,
        sink: Arc<dyn TranscriptSink>,
    ) -> Self {
        let system = PromptMessage::system(system_prompt);

        if config.max_context_tokens > 0 {
            let system_tokens = estimate_turn_tokens(&system);
            let cap = config.max_context_tokens * config.system_prompt_max_percent as usize / 100;
            if system_tokens > cap {
                warn!(
                    system_tokens,
                    cap,
                    "Persona system prompt exceeds its share of the context budget"
                );
            }
        }

        Self {
            config,
            history: vec![system],
            inactivity_deadline: None,
            sink,
        }
    }

    /// Append a user turn and re-arm the inactivity deadline.
    pub fn append_user(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.history.push(PromptMessage::user(text));
        self.inactivity_deadline =
            Some(now + Duration::milliseconds(self.config.inactivity_timeout_ms as i64));
    }

    /// Append an assistant turn and trim old turns if needed.
    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.history.push(PromptMessage::assistant(text));
        self.trim();
    }

    /// Pop the most recent non-system turn (rollback on LLM failure).
    pub fn remove_last(&mut self) -> Option<PromptMessage> {
        if self.history.len() > 1 {
            self.history.pop()
        } else {
            None
        }
    }

    /// The full ordered history, system turn first.
    pub fn history(&self) -> Vec<PromptMessage> {
        self.history.clone()
    }

    /// Number of turns including the system turn.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.len() <= 1
    }

    /// `[system, …newest turns that fit in max_context_tokens − system]`.
    /// With budgeting disabled (`max_context_tokens == 0`) this is the
    /// full history.
    pub fn history_with_budget(&self) -> Vec<PromptMessage> {
        if self.config.max_context_tokens == 0 {
            return self.history.clone();
        }
        let system = &self.history[0];
        let budget = self
            .config
            .max_context_tokens
            .saturating_sub(estimate_turn_tokens(system));

        let mut out = vec![system.clone()];
        out.extend(self.fit_newest(budget));
        out
    }

    /// `[system, …memory turns, …newest turns that fit in the remaining
    /// budget]`. Memories relevant to the last few turns are rendered as
    /// system turns prefixed `"[Memory] "`, ordered by descending score.
    /// With budgeting disabled the history is not truncated but the
    /// injection still happens.
    pub async fn history_with_memories(
        &self,
        store: &dyn MemoryStore,
        memory_budget: usize,
    ) -> Vec<PromptMessage> {
        let recent: Vec<String> = self.history[1..]
            .iter()
            .rev()
            .take(MEMORY_SEARCH_TURNS)
            .map(|m| m.content.clone())
            .collect();

        let memories = store.relevant(&recent, memory_budget).await;
        let memory_turns: Vec<PromptMessage> = memories
            .iter()
            .map(|m| PromptMessage::system(format!("{MEMORY_PREFIX}{}", m.content)))
            .collect();

        if !memory_turns.is_empty() {
            debug!(injected = memory_turns.len(), "Memories injected into prompt");
        }

        let system = &self.history[0];
        let mut out = vec![system.clone()];
        out.extend(memory_turns.iter().cloned());

        if self.config.max_context_tokens == 0 {
            out.extend(self.history[1..].iter().cloned());
            return out;
        }

        let used = estimate_turns_tokens(&out);
        let budget = self.config.max_context_tokens.saturating_sub(used);
        out.extend(self.fit_newest(budget));
        out
    }

    /// Archive the history to the transcript sink (fire-and-forget) and
    /// reconstruct `[system]`. A history holding only the system turn is
    /// not worth archiving.
    pub fn save_and_reset(&mut self, reason: &str, now: DateTime<Utc>) {
        if self.history.len() > 1 {
            self.sink.record(Transcript {
                reason: reason.to_string(),
                saved_at: now,
                turns: self.history.clone(),
            });
            debug!(reason, turns = self.history.len(), "Conversation archived and reset");
        }
        self.history.truncate(1);
        self.inactivity_deadline = None;
    }

    /// Fire the inactivity reset when the deadline has passed. Returns
    /// whether a reset happened.
    pub fn check_inactivity(&mut self, now: DateTime<Utc>) -> bool {
        match self.inactivity_deadline {
            Some(deadline) if now >= deadline => {
                self.save_and_reset("inactivity", now);
                true
            }
            _ => false,
        }
    }

    /// The newest non-system turns that fit in `budget`, chronological.
    fn fit_newest(&self, budget: usize) -> Vec<PromptMessage> {
        let mut used = 0;
        let mut picked: Vec<PromptMessage> = Vec::new();
        for msg in self.history[1..].iter().rev() {
            let tokens = estimate_turn_tokens(msg);
            if used + tokens > budget {
                break;
            }
            used += tokens;
            picked.push(msg.clone());
        }
        picked.reverse();
        picked
    }

    /// Keep the system turn plus the most recent `max_history_messages`
    /// turns verbatim.
    fn trim(&mut self) {
        let max = self.config.max_history_messages;
        if self.history.len() > max + 1 {
            let drop = self.history.len() - max - 1;
            self.history.drain(1..1 + drop);
        }
    }
}

impl std::fmt::Debug for ConversationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationManager")
            .field("turns", &self.history.len())
            .field("inactivity_deadline", &self.inactivity_deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use purrgate_core::transcript::{CollectingSink, NoopSink};
    use purrgate_core::Role;

    fn config() -> ConversationConfig {
        ConversationConfig {
            max_history_messages: 6,
            max_context_tokens: 8_000,
            system_prompt_max_percent: 80,
            inactivity_timeout_ms: 3_600_000,
        }
    }

    fn manager(config: ConversationConfig) -> ConversationManager {
        ConversationManager::new("You are the mansion's cat-maid.", config, Arc::new(NoopSink))
    }

    #[test]
    fn system_turn_always_first() {
        let mut conv = manager(config());
        conv.append_user("[Alice] hi", Utc::now());
        conv.append_assistant("Hello Alice!");

        let history = conv.history();
        assert_eq!(history[0].role, Role::System);
        assert!(history[0].content.contains("cat-maid"));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn trim_keeps_system_and_newest() {
        let mut conv = manager(config());
        for i in 0..8 {
            conv.append_user(format!("[Alice] message {i}"), Utc::now());
            conv.append_assistant(format!("reply {i}"));
        }

        // 16 turns appended, cap is 6 non-system turns.
        let history = conv.history();
        assert_eq!(history.len(), 7);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1].content, "[Alice] message 5");
        assert_eq!(history.last().unwrap().content, "reply 7");
    }

    #[test]
    fn remove_last_pops_newest_non_system() {
        let mut conv = manager(config());
        conv.append_user("[Alice] hi", Utc::now());

        let popped = conv.remove_last().unwrap();
        assert_eq!(popped.content, "[Alice] hi");
        assert_eq!(conv.len(), 1);

        // The system turn is never popped.
        assert!(conv.remove_last().is_none());
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn budget_keeps_newest_turns() {
        let mut cfg = config();
        // System turn ~8 tokens; leave room for roughly two short turns.
        cfg.max_context_tokens = 30;
        let mut conv = manager(cfg);

        for i in 0..5 {
            conv.append_user(format!("[A] msg {i}"), Utc::now()); // ~3+5 tokens each
        }

        let prompt = conv.history_with_budget();
        assert_eq!(prompt[0].role, Role::System);
        assert!(prompt.len() < 6);
        // The newest turn survives budgeting.
        assert_eq!(prompt.last().unwrap().content, "[A] msg 4");
    }

    #[test]
    fn budget_disabled_returns_everything() {
        let mut cfg = config();
        cfg.max_context_tokens = 0;
        let mut conv = manager(cfg);
        for i in 0..10 {
            conv.append_user(format!("[A] msg {i}"), Utc::now());
        }
        assert_eq!(conv.history_with_budget().len(), 11);
    }

    #[tokio::test]
    async fn memories_injected_after_system_turn() {
        use purrgate_core::memory::MemoryStore;
        use purrgate_memory::KeywordMemoryStore;

        let store = KeywordMemoryStore::new();
        store
            .add(vec!["garden".into()], "The mansion has a rose garden.".into(), 8)
            .await;

        let mut conv = manager(config());
        conv.append_user("[Alice] how is the garden today?", Utc::now());

        let prompt = conv.history_with_memories(&store, 500).await;
        assert_eq!(prompt[0].role, Role::System);
        assert_eq!(prompt[1].role, Role::System);
        assert!(prompt[1].content.starts_with("[Memory] "));
        assert!(prompt[1].content.contains("rose garden"));
        assert_eq!(prompt[2].content, "[Alice] how is the garden today?");
    }

    #[tokio::test]
    async fn memory_budget_bounds_injection() {
        use purrgate_core::memory::MemoryStore;
        use purrgate_memory::KeywordMemoryStore;

        let store = KeywordMemoryStore::new();
        // Three 400-char entries ≈ 105 tokens each with turn overhead.
        for i in 0..3 {
            store
                .add(
                    vec!["mansion".into()],
                    format!("{i}{}", "m".repeat(399)),
                    5,
                )
                .await;
        }

        let mut conv = manager(config());
        conv.append_user("[Alice] tell me about the mansion", Utc::now());

        let prompt = conv.history_with_memories(&store, 250).await;
        let memory_turns = prompt
            .iter()
            .filter(|m| m.content.starts_with("[Memory] "))
            .count();
        assert_eq!(memory_turns, 2);
    }

    #[tokio::test]
    async fn memories_injected_even_without_budgeting() {
        use purrgate_core::memory::MemoryStore;
        use purrgate_memory::KeywordMemoryStore;

        let store = KeywordMemoryStore::new();
        store.add(vec!["tea".into()], "Tea at four.".into(), 5).await;

        let mut cfg = config();
        cfg.max_context_tokens = 0;
        let mut conv = manager(cfg);
        for i in 0..10 {
            conv.append_user(format!("[A] tea please {i}"), Utc::now());
        }

        let prompt = conv.history_with_memories(&store, 500).await;
        assert!(prompt.iter().any(|m| m.content.starts_with("[Memory] ")));
        // No truncation with budgeting off: system + memory + 10 turns.
        assert_eq!(prompt.len(), 12);
    }

    #[tokio::test]
    async fn memory_search_uses_only_recent_turns() {
        use purrgate_core::memory::MemoryStore;
        use purrgate_memory::KeywordMemoryStore;

        let store = KeywordMemoryStore::new();
        store
            .add(vec!["dragon".into()], "Dragon lore.".into(), 5)
            .await;

        let mut conv = manager(config());
        conv.append_user("[A] tell me about the dragon", Utc::now());
        for i in 0..5 {
            conv.append_user(format!("[A] unrelated {i}"), Utc::now());
        }

        // The dragon turn fell outside the 5-turn search window.
        let prompt = conv.history_with_memories(&store, 500).await;
        assert!(!prompt.iter().any(|m| m.content.starts_with("[Memory] ")));
    }

    #[test]
    fn save_and_reset_archives_then_clears() {
        let sink = Arc::new(CollectingSink::new());
        let mut conv =
            ConversationManager::new("persona", config(), sink.clone());
        conv.append_user("[Alice] hi", Utc::now());
        conv.append_assistant("Hello!");

        conv.save_and_reset("reset", Utc::now());

        assert_eq!(conv.len(), 1);
        assert_eq!(sink.count(), 1);
        let saved = sink.transcripts();
        assert_eq!(saved[0].reason, "reset");
        assert_eq!(saved[0].turns.len(), 3);
    }

    #[test]
    fn empty_history_not_archived() {
        let sink = Arc::new(CollectingSink::new());
        let mut conv =
            ConversationManager::new("persona", config(), sink.clone());
        conv.save_and_reset("reset", Utc::now());
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn inactivity_fires_after_deadline() {
        let sink = Arc::new(CollectingSink::new());
        let mut cfg = config();
        cfg.inactivity_timeout_ms = 1_000;
        let mut conv = ConversationManager::new("persona", cfg, sink.clone());

        let t0 = Utc::now();
        conv.append_user("[Alice] hi", t0);

        assert!(!conv.check_inactivity(t0 + Duration::milliseconds(500)));
        assert!(conv.check_inactivity(t0 + Duration::milliseconds(1_500)));
        assert_eq!(conv.len(), 1);
        assert_eq!(sink.transcripts()[0].reason, "inactivity");

        // The deadline is disarmed after firing.
        assert!(!conv.check_inactivity(t0 + Duration::seconds(10)));
    }

    #[test]
    fn user_turn_rearms_inactivity() {
        let mut cfg = config();
        cfg.inactivity_timeout_ms = 1_000;
        let mut conv = manager(cfg);

        let t0 = Utc::now();
        conv.append_user("[Alice] one", t0);
        conv.append_user("[Alice] two", t0 + Duration::milliseconds(900));

        // The first deadline would have passed; the second append pushed it.
        assert!(!conv.check_inactivity(t0 + Duration::milliseconds(1_100)));
        assert!(conv.check_inactivity(t0 + Duration::milliseconds(2_000)));
    }
}
