//! Chunking strategies for retrieved passages.
//!
//! - semantic: accumulate sentences, cut only at boundaries where adjacent
//!   sentences diverge, carry an overlap window forward
//! - adaptive: semantic with the max size scaled by content density, topic
//!   coherence and readability
//! - topic-based: cluster sentences by best-matching extracted topic, chunk
//!   each group independently
//! - standard: fixed-size word windows with fixed overlap (fallback)

use serde::{Deserialize, Serialize};

use crate::context::assembler::estimate_tokens;
use crate::context::ContextConfig;
use crate::search::query::is_stop_word;
use crate::search::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    Semantic,
    Adaptive,
    TopicBased,
    Standard,
}

/// A bounded span of source content, the unit of compression and assembly.
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub content: String,
    pub source: String,
    pub relevance: f32,
    pub token_count: usize,
}

/// Chunk every result's content, carrying the result's relevance and source
/// onto each produced chunk.
pub fn chunk_results(results: &[SearchResult], config: &ContextConfig) -> Vec<ContextChunk> {
    let mut chunks = Vec::new();
    for result in results {
        let source = result
            .metadata
            .source
            .clone()
            .unwrap_or_else(|| result.document_id.clone());

        let pieces = match config.chunking {
            ChunkingStrategy::Semantic => semantic_chunks(
                &result.content,
                config.chunk_size,
                config.chunk_overlap,
                config.boundary_similarity_threshold,
            ),
            ChunkingStrategy::Adaptive => adaptive_chunks(
                &result.content,
                config.chunk_size,
                config.chunk_overlap,
                config.boundary_similarity_threshold,
            ),
            ChunkingStrategy::TopicBased => topic_chunks(
                &result.content,
                config.chunk_size,
                config.chunk_overlap,
                config.boundary_similarity_threshold,
            ),
            ChunkingStrategy::Standard => {
                standard_chunks(&result.content, config.chunk_size, config.chunk_overlap)
            }
        };

        for content in pieces {
            if content.trim().is_empty() {
                continue;
            }
            let token_count = estimate_tokens(&content);
            chunks.push(ContextChunk {
                content,
                source: source.clone(),
                relevance: result.relevance_score,
                token_count,
            });
        }
    }
    chunks
}

/// Split text into sentences on terminal punctuation.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars
                .peek()
                .map(|next| next.is_whitespace())
                .unwrap_or(true);
            if at_boundary {
                let sentence = current.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
            }
        }
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Overlap coefficient over lowercase word sets.
pub(crate) fn word_overlap(a: &str, b: &str) -> f32 {
    let set_a: std::collections::HashSet<String> = words_of(a).collect();
    let set_b: std::collections::HashSet<String> = words_of(b).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    intersection as f32 / set_a.len().min(set_b.len()) as f32
}

fn words_of(text: &str) -> impl Iterator<Item = String> + '_ {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect::<Vec<_>>()
        .into_iter()
}

fn semantic_chunks(
    text: &str,
    max_size: usize,
    overlap: usize,
    boundary_threshold: f32,
) -> Vec<String> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut previous: Option<&str> = None;

    for sentence in &sentences {
        let would_overflow =
            !current.is_empty() && current.len() + sentence.len() + 1 > max_size;

        if would_overflow {
            // Only cut where the topic actually shifts; a hard cap at twice
            // the size keeps pathological runs bounded.
            let similarity = previous
                .map(|prev| word_overlap(prev, sentence))
                .unwrap_or(0.0);
            let hard_cap = current.len() + sentence.len() + 1 > max_size * 2;
            if similarity < boundary_threshold || hard_cap {
                chunks.push(current.trim().to_string());
                current = overlap_tail(&current, overlap);
            }
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
        previous = Some(sentence);
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        chunks.push(tail);
    }
    chunks
}

fn adaptive_chunks(
    text: &str,
    base_size: usize,
    overlap: usize,
    boundary_threshold: f32,
) -> Vec<String> {
    let scale = adaptive_scale(text);
    let scaled = ((base_size as f32) * scale).round().max(1.0) as usize;
    semantic_chunks(text, scaled, overlap, boundary_threshold)
}

/// Blend measured density, coherence and readability into a 0.5x-1.5x size
/// scale.
fn adaptive_scale(text: &str) -> f32 {
    let sentences = split_sentences(text);
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 1.0;
    }

    let avg_word_len =
        words.iter().map(|w| w.len()).sum::<usize>() as f32 / words.len() as f32;
    let density = (avg_word_len / 8.0).min(1.0);

    let coherence = if sentences.len() >= 2 {
        let mut total = 0.0;
        for pair in sentences.windows(2) {
            total += word_overlap(&pair[0], &pair[1]);
        }
        total / (sentences.len() - 1) as f32
    } else {
        1.0
    };

    let readability = {
        let lens: Vec<f32> = sentences
            .iter()
            .map(|s| s.split_whitespace().count() as f32)
            .collect();
        if lens.len() < 2 {
            1.0
        } else {
            let mean = lens.iter().sum::<f32>() / lens.len() as f32;
            let variance =
                lens.iter().map(|l| (l - mean).powi(2)).sum::<f32>() / lens.len() as f32;
            let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };
            (1.0 - cv).clamp(0.0, 1.0)
        }
    };

    0.5 + (density + coherence + readability) / 3.0
}

fn topic_chunks(
    text: &str,
    max_size: usize,
    overlap: usize,
    boundary_threshold: f32,
) -> Vec<String> {
    let sentences = split_sentences(text);
    let topics = extract_topic_terms(text, 5);
    if topics.is_empty() || sentences.len() < 2 {
        return standard_chunks(text, max_size, overlap);
    }

    // Assign each sentence to its best-matching topic; no match lands in a
    // trailing misc group.
    let mut groups: Vec<Vec<&str>> = vec![Vec::new(); topics.len() + 1];
    for sentence in &sentences {
        let lowered = sentence.to_lowercase();
        let best = topics
            .iter()
            .enumerate()
            .filter(|(_, topic)| lowered.contains(topic.as_str()))
            .map(|(i, _)| i)
            .next();
        match best {
            Some(idx) => groups[idx].push(sentence),
            None => groups[topics.len()].push(sentence),
        }
    }

    let mut chunks = Vec::new();
    for group in groups {
        if group.is_empty() {
            continue;
        }
        let joined = group.join(" ");
        chunks.extend(semantic_chunks(
            &joined,
            max_size,
            overlap,
            boundary_threshold,
        ));
    }
    chunks
}

/// Top term-frequency keywords, stop words excluded.
pub(crate) fn extract_topic_terms(text: &str, limit: usize) -> Vec<String> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for word in words_of(text) {
        if word.len() < 3 || is_stop_word(&word) {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Fixed-size word windows with fixed overlap. Sizes arrive in characters
/// and are converted with ~6 chars per word.
fn standard_chunks(text: &str, size_chars: usize, overlap_chars: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let per_chunk = (size_chars / 6).max(1);
    let overlap_words = (overlap_chars / 6).min(per_chunk.saturating_sub(1));
    let step = (per_chunk - overlap_words).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + per_chunk).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 || text.is_empty() {
        return String::new();
    }
    if text.len() <= overlap {
        return text.trim().to_string();
    }
    let mut start = text.len() - overlap;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].trim_start().to_string()
}
