//! Keyword-indexed in-memory store.
//!
//! Entries live in a Vec in insertion order; ranking ties resolve to the
//! earlier entry, which keeps query results deterministic.

use async_trait::async_trait;
use chrono::Utc;
use purrgate_core::memory::{MemoryEntry, MemoryStore};
use purrgate_core::token::{estimate_tokens, TURN_OVERHEAD_TOKENS};
use tokio::sync::RwLock;
use tracing::debug;

/// The keyword memory store.
pub struct KeywordMemoryStore {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl KeywordMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Relevance score for one entry against a search string.
    ///
    /// Score = priority×10 + matched-keyword-count×5 + (accessed before ? 2 : 0).
    fn score(entry: &MemoryEntry, search: &str) -> Option<u64> {
        let matches = entry
            .keywords
            .iter()
            .filter(|k| search.contains(k.as_str()))
            .count() as u64;
        if matches == 0 {
            return None;
        }
        let access_bonus = if entry.access_count > 0 { 2 } else { 0 };
        Some(entry.priority as u64 * 10 + matches * 5 + access_bonus)
    }

    /// Estimated token cost of injecting an entry as a prompt turn.
    fn entry_cost(entry: &MemoryEntry) -> usize {
        estimate_tokens(&entry.content) + TURN_OVERHEAD_TOKENS
    }
}

impl Default for KeywordMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for KeywordMemoryStore {
    async fn add(&self, keywords: Vec<String>, content: String, priority: u8) -> String {
        let entry = MemoryEntry::new(keywords, content, priority);
        let id = entry.id.clone();
        self.entries.write().await.push(entry);
        id
    }

    async fn relevant(&self, recent_texts: &[String], token_budget: usize) -> Vec<MemoryEntry> {
        let search = recent_texts.join(" ").to_lowercase();
        if search.trim().is_empty() {
            return Vec::new();
        }

        let mut entries = self.entries.write().await;

        // Rank matching entries by score, descending. The sort is stable,
        // so equal scores keep insertion order.
        let mut ranked: Vec<(usize, u64)> = entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| Self::score(e, &search).map(|s| (i, s)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        // Fit the ranked list into the budget. Selection stops at the
        // first entry that overflows, so a larger budget always yields a
        // superset of a smaller one.
        let mut used = 0;
        let mut selected: Vec<usize> = Vec::new();
        for (idx, _) in &ranked {
            let cost = Self::entry_cost(&entries[*idx]);
            if used + cost > token_budget {
                break;
            }
            used += cost;
            selected.push(*idx);
        }

        let now = Utc::now();
        let mut out = Vec::with_capacity(selected.len());
        for idx in selected {
            let entry = &mut entries[idx];
            entry.last_accessed = Some(now);
            entry.access_count += 1;
            out.push(entry.clone());
        }

        if !out.is_empty() {
            debug!(
                matched = ranked.len(),
                injected = out.len(),
                tokens = used,
                budget = token_budget,
                "Memory entries selected for injection"
            );
        }
        out
    }

    async fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() < len_before
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }

    async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn get(&self, id: &str) -> Option<MemoryEntry> {
        self.entries.read().await.iter().find(|e| e.id == id).cloned()
    }

    async fn all(&self) -> Vec<MemoryEntry> {
        self.entries.read().await.clone()
    }
}
