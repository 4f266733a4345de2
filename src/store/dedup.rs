//! Duplicate detection ahead of persistence, cheapest check first:
//! 1. exact content-hash match (whitespace/case normalized)
//! 2. exact vector-hash match (components rounded to 3 decimals)
//! 3. approximate semantic match against a bounded recent-vector window

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::vector_math::cosine_similarity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    ContentHash,
    VectorHash,
    Semantic,
}

/// A detected duplicate pointing back at the stored original.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMatch {
    pub original_id: String,
    pub kind: DuplicateKind,
    pub similarity: f32,
}

pub struct DuplicateDetector {
    content_hashes: HashMap<String, String>,
    vector_hashes: HashMap<String, String>,
    recent: VecDeque<(String, Vec<f32>)>,
    window: usize,
    semantic_threshold: f32,
}

impl DuplicateDetector {
    pub fn new(window: usize, semantic_threshold: f32) -> Self {
        Self {
            content_hashes: HashMap::new(),
            vector_hashes: HashMap::new(),
            recent: VecDeque::with_capacity(window),
            window,
            semantic_threshold,
        }
    }

    /// Check an incoming item against everything recorded so far.
    /// Does not record the item; call [`record`](Self::record) for survivors.
    pub fn check(&self, content: &str, vector: &[f32]) -> Option<DuplicateMatch> {
        let content_key = content_fingerprint(content);
        if let Some(original) = self.content_hashes.get(&content_key) {
            return Some(DuplicateMatch {
                original_id: original.clone(),
                kind: DuplicateKind::ContentHash,
                similarity: 1.0,
            });
        }

        let vector_key = vector_fingerprint(vector);
        if let Some(original) = self.vector_hashes.get(&vector_key) {
            return Some(DuplicateMatch {
                original_id: original.clone(),
                kind: DuplicateKind::VectorHash,
                similarity: 1.0,
            });
        }

        let mut best: Option<(String, f32)> = None;
        for (id, recent_vector) in &self.recent {
            if recent_vector.len() != vector.len() {
                continue;
            }
            let Ok(similarity) = cosine_similarity(vector, recent_vector) else {
                continue;
            };
            if similarity > self.semantic_threshold {
                match &best {
                    Some((_, s)) if *s >= similarity => {}
                    _ => best = Some((id.clone(), similarity)),
                }
            }
        }

        best.map(|(original_id, similarity)| DuplicateMatch {
            original_id,
            kind: DuplicateKind::Semantic,
            similarity,
        })
    }

    /// Register a stored item for future duplicate checks.
    pub fn record(&mut self, id: &str, content: &str, vector: &[f32]) {
        self.content_hashes
            .insert(content_fingerprint(content), id.to_string());
        self.vector_hashes
            .insert(vector_fingerprint(vector), id.to_string());

        self.recent.push_back((id.to_string(), vector.to_vec()));
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.content_hashes.clear();
        self.vector_hashes.clear();
        self.recent.clear();
    }
}

/// Normalize whitespace and case, then hash.
fn content_fingerprint(content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Round components to 3 decimals and hash the joined string. Catches
/// numerically identical embeddings with different content framing.
fn vector_fingerprint(vector: &[f32]) -> String {
    let joined = vector
        .iter()
        .map(|v| format!("{:.3}", v))
        .collect::<Vec<_>>()
        .join(",");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}
