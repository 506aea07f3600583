//! Long-term memory for the Purrgate NPC gateway.
//!
//! The store is keyword-indexed: an entry is a candidate for prompt
//! injection when at least one of its keywords appears in the recent
//! conversation text. Candidates are ranked and fitted into a token
//! budget by the `relevant` query.

pub mod keyword;

pub use keyword::KeywordMemoryStore;
