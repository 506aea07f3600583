//! The engagement state machine.
//!
//! Drives the IDLE→LISTENING→THINKING→SPEAKING lifecycle from a single
//! tick, owns the request/decision rendezvous, and parks respond verdicts
//! that arrive when no caller is waiting. The machine holds the buffer
//! and decision layer (one-way references); neither calls back into it.

use chrono::{DateTime, Utc};
use purrgate_config::NpcConfig;
use purrgate_core::event::{DomainEvent, EventBus};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::buffer::MessageBuffer;
use crate::decision::{Decision, DecisionEngine};

/// Diagnostic transition log depth.
const MAX_TRANSITIONS: usize = 100;

/// The engine's lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing buffered, nothing happening
    Idle,
    /// Utterances buffered, waiting for a verdict
    Listening,
    /// One LLM turn in flight for the active target
    Thinking,
    /// Reply delivered, cooling down
    Speaking,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        };
        write!(f, "{name}")
    }
}

/// One recorded transition, for diagnostics.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: EngineState,
    pub to: EngineState,
    pub at: DateTime<Utc>,
    pub note: String,
}

/// The machine's mutable context.
#[derive(Debug)]
pub struct StateContext {
    state: EngineState,
    entered_at: DateTime<Utc>,
    active_target: Option<String>,
    last_reply_at: Option<DateTime<Utc>>,
    transitions: VecDeque<Transition>,
}

impl StateContext {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: EngineState::Idle,
            entered_at: now,
            active_target: None,
            last_reply_at: None,
            transitions: VecDeque::new(),
        }
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.entered_at).num_milliseconds().max(0)
    }
}

/// The state machine.
pub struct StateMachine {
    config: NpcConfig,
    pub buffer: MessageBuffer,
    pub decision: DecisionEngine,
    ctx: StateContext,
    /// Registered rendezvous waiters, FIFO per speaker.
    waiters: HashMap<String, VecDeque<oneshot::Sender<Decision>>>,
    /// Respond verdicts produced with no waiter present; one slot per
    /// speaker, consumed by at most one later caller.
    pending: HashMap<String, Decision>,
    bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(
        config: NpcConfig,
        buffer: MessageBuffer,
        decision: DecisionEngine,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            buffer,
            decision,
            ctx: StateContext::new(Utc::now()),
            waiters: HashMap::new(),
            pending: HashMap::new(),
            bus,
        }
    }

    pub fn state(&self) -> EngineState {
        self.ctx.state
    }

    /// The speaker the machine is thinking about, non-null iff THINKING.
    pub fn active_target(&self) -> Option<&str> {
        self.ctx.active_target.as_deref()
    }

    pub fn last_reply_at(&self) -> Option<DateTime<Utc>> {
        self.ctx.last_reply_at
    }

    /// Recent transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.ctx.transitions.iter()
    }

    /// Whether a pending verdict is parked for this speaker.
    pub fn has_pending(&self, avatar_id: &str) -> bool {
        self.pending.contains_key(avatar_id)
    }

    /// Drive all time-based transitions. Called once per tick interval.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        match self.ctx.state {
            EngineState::Idle => {
                if self.buffer.has_buffered() {
                    self.transition(EngineState::Listening, now, "buffer non-empty");
                }
            }
            EngineState::Listening => {
                let decision = self.decision.decide(&self.buffer.snapshot(), now);
                self.bus.publish(DomainEvent::DecisionMade {
                    respond: decision.respond,
                    target: decision.target.clone(),
                    reason: decision.reason.to_string(),
                    score: decision.score,
                    timestamp: now,
                });

                if decision.respond {
                    let target = decision
                        .target
                        .clone()
                        .expect("respond verdict carries a target");
                    if self.wake_waiter(&target, decision.clone()) {
                        self.ctx.active_target = Some(target);
                        self.transition(EngineState::Thinking, now, "decision delivered");
                    } else {
                        // No caller is parked for this speaker; hold the
                        // verdict for their next request instead of
                        // thinking into the void.
                        debug!(target = %target, "Respond verdict parked, no waiter");
                        self.pending.insert(target, decision);
                    }
                } else if self.ctx.elapsed_ms(now) > self.config.listening_timeout_ms as i64 {
                    self.buffer.sweep_expired(now);
                    self.transition(EngineState::Idle, now, "listening timeout");
                }
            }
            EngineState::Thinking => {
                if self.ctx.elapsed_ms(now) > self.config.thinking_timeout_ms as i64 {
                    warn!(
                        target = ?self.ctx.active_target,
                        "Thinking timed out, recovering to idle"
                    );
                    self.abort_thinking(now, "thinking timeout");
                }
            }
            EngineState::Speaking => {
                if self.ctx.elapsed_ms(now) > self.config.speaking_cooldown_ms as i64 {
                    if self.buffer.has_buffered() {
                        self.transition(EngineState::Listening, now, "cooldown over, buffer non-empty");
                    } else {
                        self.transition(EngineState::Idle, now, "cooldown over, buffer empty");
                    }
                }
            }
        }
    }

    /// Consume a parked verdict for this speaker, if one exists and the
    /// machine can start a turn. Consumption moves the machine straight
    /// to THINKING; a machine already thinking (or cooling down) keeps
    /// the verdict parked so it never holds two in-flight turns.
    pub fn try_consume_pending(&mut self, avatar_id: &str, now: DateTime<Utc>) -> Option<Decision> {
        if !matches!(self.ctx.state, EngineState::Idle | EngineState::Listening) {
            return None;
        }
        let decision = self.pending.remove(avatar_id)?;
        self.ctx.active_target = Some(avatar_id.to_string());
        self.transition(EngineState::Thinking, now, "pending decision consumed");
        Some(decision)
    }

    /// Register a rendezvous waiter for this speaker.
    pub fn register_waiter(&mut self, avatar_id: &str) -> oneshot::Receiver<Decision> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .entry(avatar_id.to_string())
            .or_default()
            .push_back(tx);
        rx
    }

    /// Drop waiters whose receiving side has gone away (rendezvous
    /// timeout). Called by the timed-out caller itself.
    pub fn deregister_waiter(&mut self, avatar_id: &str) {
        if let Some(queue) = self.waiters.get_mut(avatar_id) {
            queue.retain(|tx| !tx.is_closed());
            if queue.is_empty() {
                self.waiters.remove(avatar_id);
            }
        }
    }

    /// The LLM reply is in; enter the cooldown.
    pub fn on_llm_response_ready(&mut self, now: DateTime<Utc>) {
        if self.ctx.state != EngineState::Thinking {
            warn!(state = %self.ctx.state, "on_llm_response_ready outside THINKING, ignored");
            return;
        }
        self.ctx.active_target = None;
        self.ctx.last_reply_at = Some(now);
        self.transition(EngineState::Speaking, now, "reply ready");
    }

    /// The LLM call failed; clear the target's buffer and recover.
    pub fn on_llm_error(&mut self, now: DateTime<Utc>) {
        if self.ctx.state != EngineState::Thinking {
            warn!(state = %self.ctx.state, "on_llm_error outside THINKING, ignored");
            return;
        }
        self.abort_thinking(now, "llm error");
    }

    /// Clear all buffers, decision bookkeeping, waiters, and pending
    /// verdicts, and return to IDLE regardless of the current state.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.buffer.clear_all();
        self.decision.clear_history();
        self.pending.clear();
        self.waiters.clear();
        self.ctx.active_target = None;
        if self.ctx.state != EngineState::Idle {
            self.transition(EngineState::Idle, now, "reset");
        }
        info!("Engine reset");
    }

    /// Wake the first live waiter for this speaker. A decision targeting
    /// a different speaker never wakes a waiter.
    fn wake_waiter(&mut self, avatar_id: &str, decision: Decision) -> bool {
        let mut delivered = false;
        if let Some(queue) = self.waiters.get_mut(avatar_id) {
            while let Some(tx) = queue.pop_front() {
                // A closed sender is a caller that already timed out.
                if tx.send(decision.clone()).is_ok() {
                    delivered = true;
                    break;
                }
            }
        }
        if self.waiters.get(avatar_id).is_some_and(|q| q.is_empty()) {
            self.waiters.remove(avatar_id);
        }
        delivered
    }

    fn abort_thinking(&mut self, now: DateTime<Utc>, note: &str) {
        if let Some(target) = self.ctx.active_target.take() {
            self.buffer.clear_speaker(&target);
        }
        self.transition(EngineState::Idle, now, note);
    }

    fn transition(&mut self, to: EngineState, now: DateTime<Utc>, note: &str) {
        let from = self.ctx.state;
        debug!(from = %from, to = %to, note, "State transition");
        self.bus.publish(DomainEvent::StateChanged {
            from: from.to_string(),
            to: to.to_string(),
            timestamp: now,
        });
        self.ctx.transitions.push_back(Transition {
            from,
            to,
            at: now,
            note: note.to_string(),
        });
        while self.ctx.transitions.len() > MAX_TRANSITIONS {
            self.ctx.transitions.pop_front();
        }
        self.ctx.state = to;
        self.ctx.entered_at = now;
    }
}
