//! The engine facade — one coarse critical section.
//!
//! All shared state (buffer, decision bookkeeping, state context,
//! conversation history) lives behind a single `tokio::sync::Mutex`, so
//! ingest, decide, rendezvous registration, decision broadcast, state
//! transitions, and conversation mutations are linearizable. The memory
//! store is read-mostly after startup and carries its own interior
//! locking. LLM calls always happen outside the lock.

use chrono::Utc;
use purrgate_config::{AppConfig, MemoryConfig, NpcConfig};
use purrgate_core::event::{DomainEvent, EventBus};
use purrgate_core::memory::MemoryStore;
use purrgate_core::persona::Persona;
use purrgate_core::transcript::TranscriptSink;
use purrgate_core::PromptMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::buffer::MessageBuffer;
use crate::conversation::ConversationManager;
use crate::decision::{Decision, DecisionEngine, RandomSource};
use crate::state::{EngineState, StateMachine};

/// The transient system turn telling the model whom to address.
fn address_hint(speaker: &str) -> PromptMessage {
    PromptMessage::system(format!(
        "You are responding to {speaker}. Address them directly by name."
    ))
}

struct EngineInner {
    machine: StateMachine,
    conversation: ConversationManager,
}

/// The NPC engagement engine.
pub struct NpcEngine {
    inner: Mutex<EngineInner>,
    memory: Arc<dyn MemoryStore>,
    bus: Arc<EventBus>,
    npc: NpcConfig,
    memory_cfg: MemoryConfig,
}

impl NpcEngine {
    pub fn new(
        config: &AppConfig,
        persona: &Persona,
        memory: Arc<dyn MemoryStore>,
        sink: Arc<dyn TranscriptSink>,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        let bus = Arc::new(EventBus::default());
        let machine = StateMachine::new(
            config.npc.clone(),
            MessageBuffer::new(config.buffer.clone()),
            DecisionEngine::new(config.score.clone(), rng),
            bus.clone(),
        );
        let conversation =
            ConversationManager::new(&persona.system_prompt, config.conversation.clone(), sink);

        Self {
            inner: Mutex::new(EngineInner {
                machine,
                conversation,
            }),
            memory,
            bus,
            npc: config.npc.clone(),
            memory_cfg: config.memory.clone(),
        }
    }

    /// Seed the memory store from persona facts. Called once at startup.
    pub async fn seed_memories(&self, persona: &Persona) {
        for fact in &persona.facts {
            self.memory
                .add(fact.keywords.clone(), fact.content.clone(), fact.priority)
                .await;
        }
        if !persona.facts.is_empty() {
            info!(count = persona.facts.len(), "Persona facts seeded into memory");
        }
    }

    /// The diagnostic event bus.
    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// The long-term memory store.
    pub fn memory(&self) -> Arc<dyn MemoryStore> {
        self.memory.clone()
    }

    /// Ingest one utterance: compute the mention flag, buffer it, publish
    /// the diagnostic event. Returns the mention flag.
    pub async fn ingest(&self, avatar_id: &str, speaker: &str, text: &str) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let mention = inner.machine.decision.detect_mention(text);
        inner
            .machine
            .buffer
            .ingest(avatar_id, speaker, text, mention, now);
        self.bus.publish(DomainEvent::UtteranceBuffered {
            avatar_id: avatar_id.to_string(),
            speaker: speaker.to_string(),
            direct_mention: mention,
            timestamp: now,
        });
        mention
    }

    /// Park on the rendezvous until the machine produces a decision for
    /// this speaker, or the timeout elapses.
    ///
    /// A pending verdict left by a prior tick is consumed immediately.
    /// The pending check and waiter registration happen under the same
    /// lock acquisition, which closes the lost-wakeup window.
    pub async fn wait_for_decision(&self, avatar_id: &str, timeout: Duration) -> Option<Decision> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if let Some(decision) = inner.machine.try_consume_pending(avatar_id, Utc::now()) {
                debug!(avatar_id, "Pending decision consumed");
                return Some(decision);
            }
            inner.machine.register_waiter(avatar_id)
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(decision)) => Some(decision),
            _ => {
                self.inner
                    .lock()
                    .await
                    .machine
                    .deregister_waiter(avatar_id);
                None
            }
        }
    }

    /// One state-machine tick plus the conversation inactivity check.
    pub async fn tick_once(&self, now: chrono::DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.machine.tick(now);
        inner.conversation.check_inactivity(now);
    }

    /// Spawn the ticker task driving all time-based transitions.
    pub fn spawn_ticker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_millis(self.npc.tick_interval_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick_once(Utc::now()).await;
            }
        })
    }

    /// Assemble the prompt for the active target: aggregate the speaker's
    /// buffered utterances, append them as a named user turn, inject
    /// memories within budget, and splice the address hint right after
    /// the persona turn.
    ///
    /// Returns `None` (recovering the machine) if the buffer drained
    /// between the decision and this call.
    pub async fn build_prompt(&self, avatar_id: &str, speaker: &str) -> Option<Vec<PromptMessage>> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let Some(aggregated) = inner.machine.buffer.aggregated_content(avatar_id, now) else {
            inner.machine.on_llm_error(now);
            return None;
        };

        inner
            .conversation
            .append_user(format!("[{speaker}] {aggregated}"), now);

        let mut prompt = if self.memory_cfg.enabled {
            inner
                .conversation
                .history_with_memories(self.memory.as_ref(), self.memory_cfg.token_budget)
                .await
        } else {
            inner.conversation.history_with_budget()
        };
        prompt.insert(1, address_hint(speaker));
        Some(prompt)
    }

    /// Record a successful LLM reply: append the assistant turn, move the
    /// machine to SPEAKING, and mark + clear the speaker's buffer.
    pub async fn complete_reply(&self, avatar_id: &str, reply: &str, model: &str, tokens: u32) {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner.conversation.append_assistant(reply);
        inner.machine.on_llm_response_ready(now);
        inner.machine.buffer.mark_responded(avatar_id, now);
        inner.machine.buffer.clear_speaker(avatar_id);
        self.bus.publish(DomainEvent::ReplyGenerated {
            avatar_id: avatar_id.to_string(),
            model: model.to_string(),
            tokens_used: tokens,
            timestamp: now,
        });
    }

    /// Roll back after an LLM failure: drop the user turn that was just
    /// appended and let the machine recover (it clears the target's
    /// buffer).
    pub async fn fail_reply(&self, context: &str, error_message: &str) {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner.conversation.remove_last();
        inner.machine.on_llm_error(now);
        self.bus.publish(DomainEvent::ErrorOccurred {
            context: context.to_string(),
            error_message: error_message.to_string(),
            timestamp: now,
        });
    }

    /// Full reset: archive the conversation, clear all buffers and
    /// bookkeeping, return to IDLE.
    pub async fn reset_all(&self, reason: &str) {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner.conversation.save_and_reset(reason, now);
        inner.machine.reset(now);
    }

    // --- Introspection (status endpoint, tests) ---

    pub async fn state(&self) -> EngineState {
        self.inner.lock().await.machine.state()
    }

    pub async fn active_target(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .machine
            .active_target()
            .map(String::from)
    }

    pub async fn history(&self) -> Vec<PromptMessage> {
        self.inner.lock().await.conversation.history()
    }

    pub async fn buffered_total(&self) -> usize {
        self.inner.lock().await.machine.buffer.total_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::FixedRandom;
    use purrgate_core::transcript::NoopSink;
    use purrgate_memory::KeywordMemoryStore;

    fn engine() -> Arc<NpcEngine> {
        let mut config = AppConfig::default();
        config.score.response_chance = 1.0;
        config.score.randomness_range = 0.0;
        let persona = Persona {
            name: "Mio".into(),
            system_prompt: "You are Mio the cat-maid.".into(),
            facts: vec![],
        };
        Arc::new(NpcEngine::new(
            &config,
            &persona,
            Arc::new(KeywordMemoryStore::new()),
            Arc::new(NoopSink),
            Box::new(FixedRandom(0.0)),
        ))
    }

    #[tokio::test]
    async fn ingest_computes_mention_flag() {
        let engine = engine();
        assert!(engine.ingest("carol", "Carol", "hey maid!").await);
        assert!(!engine.ingest("alice", "Alice", "hello").await);
        assert_eq!(engine.buffered_total().await, 2);
    }

    #[tokio::test]
    async fn waiter_woken_by_matching_decision() {
        let engine = engine();
        engine.ingest("carol", "Carol", "hey maid!").await;
        engine.tick_once(Utc::now()).await; // idle -> listening

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .wait_for_decision("carol", Duration::from_secs(2))
                    .await
            })
        };
        // Let the waiter register before the deciding tick.
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.tick_once(Utc::now()).await;

        let decision = waiter.await.unwrap().expect("decision for carol");
        assert!(decision.respond);
        assert_eq!(engine.state().await, EngineState::Thinking);
    }

    #[tokio::test]
    async fn wait_times_out_without_decision() {
        let engine = engine();
        engine.ingest("alice", "Alice", "just chatter").await;
        let decision = engine
            .wait_for_decision("alice", Duration::from_millis(50))
            .await;
        assert!(decision.is_none());
    }

    #[tokio::test]
    async fn pending_decision_consumed_by_next_wait() {
        let engine = engine();
        engine.ingest("carol", "Carol", "hey maid!").await;
        let now = Utc::now();
        engine.tick_once(now).await; // idle -> listening
        engine.tick_once(now).await; // respond, no waiter -> parked

        assert_eq!(engine.state().await, EngineState::Listening);
        let decision = engine
            .wait_for_decision("carol", Duration::from_millis(10))
            .await;
        assert!(decision.is_some());
        assert_eq!(engine.state().await, EngineState::Thinking);
    }

    #[tokio::test]
    async fn build_prompt_names_speaker_and_hints_address() {
        let engine = engine();
        engine.ingest("carol", "Carol", "hey maid!").await;
        let now = Utc::now();
        engine.tick_once(now).await;
        engine.tick_once(now).await;
        engine
            .wait_for_decision("carol", Duration::from_millis(10))
            .await
            .unwrap();

        let prompt = engine.build_prompt("carol", "Carol").await.unwrap();
        assert!(prompt[0].content.contains("cat-maid"));
        assert!(prompt[1].content.contains("You are responding to Carol"));
        assert_eq!(prompt.last().unwrap().content, "[Carol] hey maid!");
    }

    #[tokio::test]
    async fn complete_reply_cleans_up() {
        let engine = engine();
        engine.ingest("carol", "Carol", "hey maid!").await;
        let now = Utc::now();
        engine.tick_once(now).await;
        engine.tick_once(now).await;
        engine
            .wait_for_decision("carol", Duration::from_millis(10))
            .await
            .unwrap();
        engine.build_prompt("carol", "Carol").await.unwrap();

        engine
            .complete_reply("carol", "Nya~ hello Carol!", "mock", 15)
            .await;

        assert_eq!(engine.state().await, EngineState::Speaking);
        assert_eq!(engine.buffered_total().await, 0);
        let history = engine.history().await;
        assert_eq!(history.last().unwrap().content, "Nya~ hello Carol!");
    }

    #[tokio::test]
    async fn fail_reply_rolls_back() {
        let engine = engine();
        engine.ingest("carol", "Carol", "hey maid!").await;
        let now = Utc::now();
        engine.tick_once(now).await;
        engine.tick_once(now).await;
        engine
            .wait_for_decision("carol", Duration::from_millis(10))
            .await
            .unwrap();
        let history_before = engine.history().await.len();
        engine.build_prompt("carol", "Carol").await.unwrap();

        engine.fail_reply("llm", "boom").await;

        assert_eq!(engine.history().await.len(), history_before);
        assert_eq!(engine.state().await, EngineState::Idle);
        assert!(engine.active_target().await.is_none());
        assert_eq!(engine.buffered_total().await, 0);
    }

    #[tokio::test]
    async fn reset_all_restores_initial_shape() {
        let engine = engine();
        engine.ingest("carol", "Carol", "hey maid!").await;
        engine.reset_all("reset").await;

        assert_eq!(engine.state().await, EngineState::Idle);
        assert_eq!(engine.buffered_total().await, 0);
        assert_eq!(engine.history().await.len(), 1);
    }

    #[tokio::test]
    async fn seed_memories_loads_persona_facts() {
        let engine = engine();
        let persona = Persona {
            name: "Mio".into(),
            system_prompt: "prompt".into(),
            facts: vec![purrgate_core::PersonaFact {
                keywords: vec!["tea".into()],
                content: "Tea at four.".into(),
                priority: 6,
            }],
        };
        engine.seed_memories(&persona).await;
        assert_eq!(engine.memory().count().await, 1);
    }
}
