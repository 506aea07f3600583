//! Token estimation contract.
//!
//! All budget math in the engine uses the same heuristic: 1 token ≈ 4
//! characters, rounded up, plus a fixed per-turn framing overhead. The
//! heuristic is accurate within ~10% for BPE tokenizers on English text,
//! and being a fixed contract keeps test cases predictable across the
//! conversation manager and the memory store.

use crate::message::PromptMessage;

/// Framing overhead per prompt turn (role name, delimiters, wire markers).
pub const TURN_OVERHEAD_TOKENS: usize = 5;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single prompt turn including framing overhead.
pub fn estimate_turn_tokens(message: &PromptMessage) -> usize {
    TURN_OVERHEAD_TOKENS + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of prompt turns.
pub fn estimate_turns_tokens(messages: &[PromptMessage]) -> usize {
    messages.iter().map(estimate_turn_tokens).sum()
}
