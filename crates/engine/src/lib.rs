//! # Purrgate Engine
//!
//! The NPC engagement engine: a message-buffering, priority-scoring,
//! state-machine-driven dispatcher that turns an unbounded stream of
//! multi-speaker utterances into at most one in-flight LLM turn at a
//! time, addressed to exactly one chosen speaker.
//!
//! ## Components
//!
//! - [`buffer::MessageBuffer`] — per-speaker queues with aggregation,
//!   expiry, and overflow eviction
//! - [`decision::DecisionEngine`] — scores each speaker's buffer and
//!   chooses at most one target per tick
//! - [`conversation::ConversationManager`] — ordered dialogue history and
//!   token-budgeted prompt assembly with memory injection
//! - [`state::StateMachine`] — the IDLE→LISTENING→THINKING→SPEAKING
//!   lifecycle, tick loop, and request/decision rendezvous
//! - [`engine::NpcEngine`] — the single coarse critical section wiring it
//!   all together
//! - [`dispatch::Dispatcher`] — the glue the HTTP layer calls: ingest a
//!   message, block until decided, run the LLM, emit the reply

pub mod buffer;
pub mod conversation;
pub mod decision;
pub mod dispatch;
pub mod engine;
pub mod state;

pub use buffer::{MessageBuffer, SpeakerBuffer};
pub use conversation::ConversationManager;
pub use decision::{Decision, DecisionEngine, DecisionReason, FixedRandom, RandomSource, ThreadRngSource};
pub use dispatch::{Dispatcher, Outcome};
pub use engine::NpcEngine;
pub use state::{EngineState, StateMachine};
