//! Chunk compression strategies.
//!
//! - extractive: keep the top `ratio` fraction of sentences by
//!   term-frequency weighted importance, in original order
//! - abstractive: build a short summary from key phrases and tracked
//!   conversation entities
//! - hybrid: extractive at `sqrt(ratio)`, then abstractive on the result
//!
//! A compressed chunk is only accepted when its measured quality (ratio
//! closeness, entity preservation, coherence) meets the floor; otherwise the
//! original chunk is kept.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::context::chunking::split_sentences;
use crate::search::query::is_stop_word;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    Extractive,
    Abstractive,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub content: String,
    pub actual_ratio: f32,
    pub quality: f32,
    pub applied: bool,
}

/// Text shorter than this is not worth compressing.
const MIN_COMPRESSIBLE_CHARS: usize = 200;

pub fn compress_text(
    text: &str,
    strategy: CompressionStrategy,
    ratio: f32,
    entities: &[String],
    quality_floor: f32,
) -> CompressionOutcome {
    if text.len() < MIN_COMPRESSIBLE_CHARS {
        return CompressionOutcome {
            content: text.to_string(),
            actual_ratio: 1.0,
            quality: 1.0,
            applied: false,
        };
    }

    let ratio = ratio.clamp(0.05, 1.0);
    let compressed = match strategy {
        CompressionStrategy::Extractive => extractive(text, ratio),
        CompressionStrategy::Abstractive => abstractive(text, entities),
        CompressionStrategy::Hybrid => {
            let extracted = extractive(text, ratio.sqrt());
            abstractive(&extracted, entities)
        }
    };

    let actual_ratio = compressed.len() as f32 / text.len() as f32;
    let quality = measure_quality(text, &compressed, ratio, entities);
    let applied = quality >= quality_floor && compressed.len() < text.len();

    CompressionOutcome {
        content: if applied {
            compressed
        } else {
            text.to_string()
        },
        actual_ratio,
        quality,
        applied,
    }
}

/// Keep the top `ratio` fraction of sentences by TF-weighted importance,
/// preserving original order.
fn extractive(text: &str, ratio: f32) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= 1 {
        return text.to_string();
    }

    let tf = term_frequencies(text);
    let mut scored: Vec<(usize, f32)> = sentences
        .iter()
        .enumerate()
        .map(|(i, sentence)| (i, sentence_importance(sentence, &tf)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let keep = ((sentences.len() as f32) * ratio).ceil().max(1.0) as usize;
    let mut kept_indices: Vec<usize> = scored.into_iter().take(keep).map(|(i, _)| i).collect();
    kept_indices.sort_unstable();

    kept_indices
        .into_iter()
        .map(|i| sentences[i].as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build a short summary from key phrases and the entities still present in
/// the text.
fn abstractive(text: &str, entities: &[String]) -> String {
    let phrases = key_phrases(text, 5);
    let lowered = text.to_lowercase();
    let present: Vec<&String> = entities
        .iter()
        .filter(|e| lowered.contains(&e.to_lowercase()))
        .take(5)
        .collect();

    let mut summary = if phrases.is_empty() {
        split_sentences(text)
            .first()
            .cloned()
            .unwrap_or_else(|| text.to_string())
    } else {
        format!("Key points: {}.", phrases.join(", "))
    };

    if !present.is_empty() {
        let names: Vec<&str> = present.iter().map(|e| e.as_str()).collect();
        summary.push_str(&format!(" Mentions {}.", names.join(", ")));
    }
    summary
}

fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut counts: HashMap<String, f32> = HashMap::new();
    let mut total = 0.0f32;
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !is_stop_word(w))
    {
        *counts.entry(word.to_string()).or_insert(0.0) += 1.0;
        total += 1.0;
    }
    if total > 0.0 {
        for value in counts.values_mut() {
            *value /= total;
        }
    }
    counts
}

fn sentence_importance(sentence: &str, tf: &HashMap<String, f32>) -> f32 {
    let words: Vec<String> = sentence
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_string())
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let sum: f32 = words.iter().filter_map(|w| tf.get(w)).sum();
    sum / (words.len() as f32).sqrt()
}

fn key_phrases(text: &str, limit: usize) -> Vec<String> {
    let tf = term_frequencies(text);
    let mut ranked: Vec<(String, f32)> = tf.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Ratio closeness + entity preservation + coherence, weighted 0.4/0.3/0.3.
fn measure_quality(original: &str, compressed: &str, target_ratio: f32, entities: &[String]) -> f32 {
    let actual_ratio = compressed.len() as f32 / original.len() as f32;
    let closeness = 1.0 - (actual_ratio - target_ratio).abs().min(1.0);

    let original_lower = original.to_lowercase();
    let compressed_lower = compressed.to_lowercase();
    let in_original: Vec<&String> = entities
        .iter()
        .filter(|e| original_lower.contains(&e.to_lowercase()))
        .collect();
    let preservation = if in_original.is_empty() {
        1.0
    } else {
        let kept = in_original
            .iter()
            .filter(|e| compressed_lower.contains(&e.to_lowercase()))
            .count();
        kept as f32 / in_original.len() as f32
    };

    let words: Vec<&str> = compressed.split_whitespace().collect();
    let coherence = if words.is_empty() {
        0.0
    } else {
        let unique: std::collections::HashSet<String> =
            words.iter().map(|w| w.to_lowercase()).collect();
        unique.len() as f32 / words.len() as f32
    };

    (0.4 * closeness + 0.3 * preservation + 0.3 * coherence).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_text() -> String {
        "The scheduler assigns tasks to workers based on load. \
         Each worker polls the queue for pending tasks every second. \
         Failed tasks are retried with exponential backoff by the scheduler. \
         The dashboard displays worker utilization and queue depth. \
         Metrics are exported to the monitoring system every minute. \
         Alerts fire when queue depth exceeds the configured threshold."
            .to_string()
    }

    #[test]
    fn short_text_is_left_alone() {
        let outcome = compress_text(
            "Too short to bother.",
            CompressionStrategy::Extractive,
            0.5,
            &[],
            0.8,
        );
        assert!(!outcome.applied);
        assert_eq!(outcome.content, "Too short to bother.");
    }

    #[test]
    fn extractive_keeps_sentence_order() {
        let text = long_text();
        let compressed = extractive(&text, 0.5);
        let sentences = split_sentences(&compressed);
        assert!(sentences.len() <= 3);

        // Kept sentences appear in their original relative order.
        let mut last_pos = 0;
        for sentence in &sentences {
            let pos = text.find(sentence.as_str()).unwrap();
            assert!(pos >= last_pos);
            last_pos = pos;
        }
    }

    #[test]
    fn rejected_compression_keeps_original() {
        let text = long_text();
        let outcome = compress_text(&text, CompressionStrategy::Abstractive, 0.9, &[], 0.99);
        if !outcome.applied {
            assert_eq!(outcome.content, text);
        }
    }

    #[test]
    fn abstractive_mentions_tracked_entities() {
        let text = format!("{} The Scheduler is central to all of this.", long_text());
        let entities = vec!["Scheduler".to_string(), "Unrelated".to_string()];
        let summary = abstractive(&text, &entities);
        assert!(summary.contains("Scheduler"));
        assert!(!summary.contains("Unrelated"));
    }

    #[test]
    fn quality_is_bounded() {
        let text = long_text();
        for strategy in [
            CompressionStrategy::Extractive,
            CompressionStrategy::Abstractive,
            CompressionStrategy::Hybrid,
        ] {
            let outcome = compress_text(&text, strategy, 0.5, &[], 0.8);
            assert!(outcome.quality >= 0.0 && outcome.quality <= 1.0);
        }
    }
}
