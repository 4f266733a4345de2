//! Query text optimization: trim, lowercase, stop-word removal.
//!
//! Optimization is memoized per raw query because the same raw string is
//! often re-submitted across turns.

use std::collections::HashMap;
use std::sync::Mutex;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from",
    "has", "have", "how", "in", "is", "it", "its", "of", "on", "or", "that",
    "the", "their", "there", "these", "this", "to", "was", "we", "were",
    "what", "when", "where", "which", "who", "will", "with",
];

pub struct QueryOptimizer {
    memo: Mutex<HashMap<String, String>>,
    capacity: usize,
}

impl QueryOptimizer {
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(HashMap::new()),
            capacity: 1024,
        }
    }

    /// Normalize a raw query. Falls back to the trimmed lowercase input when
    /// stop-word removal would leave nothing.
    pub fn optimize(&self, raw: &str) -> String {
        if let Some(hit) = self.memo.lock().unwrap().get(raw) {
            return hit.clone();
        }

        let optimized = optimize_text(raw);

        let mut memo = self.memo.lock().unwrap();
        if memo.len() >= self.capacity {
            memo.clear();
        }
        memo.insert(raw.to_string(), optimized.clone());
        optimized
    }
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

fn optimize_text(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let kept: Vec<&str> = lowered
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .collect();

    if kept.is_empty() {
        lowered
    } else {
        kept.join(" ")
    }
}

/// Split an optimized query into search terms.
pub fn query_terms(optimized: &str) -> Vec<String> {
    optimized
        .split_whitespace()
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

pub(crate) fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}
