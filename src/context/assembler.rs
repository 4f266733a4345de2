//! Token-budgeted context assembly.
//!
//! Budget allocation: up to 20% to the conversation summary when present
//! and fitting; the remainder goes to chunks in descending relevance order.
//! A chunk that would overflow the budget is skipped whole — nothing is ever
//! truncated mid-chunk, so everything included keeps sentence-level
//! integrity.

use std::collections::HashMap;

use serde::Serialize;

use crate::context::chunking::{split_sentences, word_overlap, ChunkingStrategy, ContextChunk};
use crate::context::memory::ConversationContext;
use crate::context::ContextConfig;
use crate::quality::scoring::coherence_score;

/// ~4 characters per token for English text.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextMetadata {
    pub original_token_count: usize,
    pub chunking_strategy: ChunkingStrategy,
    pub quality_score: f32,
    pub coherence_score: f32,
    pub topic_consistency: f32,
}

/// The pipeline's output: an immutable, token-bounded context block.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizedContext {
    pub content: String,
    pub token_count: usize,
    pub relevance_score: f32,
    pub compression_ratio: f32,
    pub sources: Vec<String>,
    pub metadata: ContextMetadata,
    pub conversation_summary: Option<String>,
    pub key_insights: Vec<String>,
    pub entity_mentions: HashMap<String, u32>,
}

impl OptimizedContext {
    pub(crate) fn empty(strategy: ChunkingStrategy) -> Self {
        Self {
            content: String::new(),
            token_count: 0,
            relevance_score: 0.0,
            compression_ratio: 1.0,
            sources: Vec::new(),
            metadata: ContextMetadata {
                original_token_count: 0,
                chunking_strategy: strategy,
                quality_score: 0.0,
                coherence_score: 0.0,
                topic_consistency: 0.0,
            },
            conversation_summary: None,
            key_insights: Vec::new(),
            entity_mentions: HashMap::new(),
        }
    }
}

pub fn assemble(
    chunks: Vec<ContextChunk>,
    conversation: Option<&ConversationContext>,
    config: &ContextConfig,
    original_token_count: usize,
) -> OptimizedContext {
    let budget = config.max_context_tokens;
    let mut used = 0usize;
    let mut parts: Vec<String> = Vec::new();
    let mut conversation_summary = None;

    // Up to 20% of the budget for the conversation summary.
    if let Some(summary) = conversation.and_then(|c| c.summary.as_ref()) {
        let part = format!("[Conversation Summary]\n{summary}");
        let cost = estimate_tokens(&part) + 1;
        if cost <= budget / 5 {
            used += cost;
            parts.push(part);
            conversation_summary = Some(summary.clone());
        }
    }

    let mut ranked = chunks;
    ranked.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut included: Vec<ContextChunk> = Vec::new();
    for chunk in ranked {
        let cost = estimate_tokens(&chunk.content) + 1;
        if used + cost > budget {
            // Skipped entirely; smaller chunks further down may still fit.
            continue;
        }
        used += cost;
        included.push(chunk);
    }

    if included.is_empty() && parts.is_empty() {
        let mut empty = OptimizedContext::empty(config.chunking);
        empty.metadata.original_token_count = original_token_count;
        return empty;
    }

    for chunk in &included {
        parts.push(chunk.content.clone());
    }
    let content = parts.join("\n\n");

    let relevance_score = if included.is_empty() {
        0.0
    } else {
        included.iter().map(|c| c.relevance).sum::<f32>() / included.len() as f32
    };

    let coherence = coherence_score(&content);
    let quality_score = (0.5 * relevance_score + 0.5 * coherence).clamp(0.0, 1.0);
    let topic_consistency = chunk_topic_consistency(&included);

    let mut sources = Vec::new();
    for chunk in &included {
        if !sources.contains(&chunk.source) {
            sources.push(chunk.source.clone());
        }
    }

    let compression_ratio = if original_token_count > 0 {
        used as f32 / original_token_count as f32
    } else {
        1.0
    };

    OptimizedContext {
        key_insights: extract_insights(&included, 3),
        entity_mentions: count_entity_mentions(&content, conversation),
        content,
        token_count: used,
        relevance_score,
        compression_ratio,
        sources,
        metadata: ContextMetadata {
            original_token_count,
            chunking_strategy: config.chunking,
            quality_score,
            coherence_score: coherence,
            topic_consistency,
        },
        conversation_summary,
    }
}

/// Mean pairwise overlap between included chunks; a single chunk is fully
/// consistent with itself.
fn chunk_topic_consistency(chunks: &[ContextChunk]) -> f32 {
    if chunks.len() <= 1 {
        return if chunks.is_empty() { 0.0 } else { 1.0 };
    }

    let mut total = 0.0;
    let mut pairs = 0;
    for i in 0..chunks.len() {
        for j in (i + 1)..chunks.len() {
            total += word_overlap(&chunks[i].content, &chunks[j].content);
            pairs += 1;
        }
    }
    total / pairs as f32
}

/// Lead sentence of each top chunk.
fn extract_insights(chunks: &[ContextChunk], limit: usize) -> Vec<String> {
    let mut insights = Vec::new();
    for chunk in chunks.iter().take(limit) {
        if let Some(first) = split_sentences(&chunk.content).into_iter().next() {
            if !insights.contains(&first) {
                insights.push(first);
            }
        }
    }
    insights
}

/// Count occurrences of tracked conversation entities in the assembled
/// content; without a conversation, count capitalized tokens instead.
fn count_entity_mentions(
    content: &str,
    conversation: Option<&ConversationContext>,
) -> HashMap<String, u32> {
    let mut mentions = HashMap::new();
    let lowered = content.to_lowercase();

    match conversation {
        Some(conv) if !conv.entities.is_empty() => {
            for entity in conv.entities.keys() {
                let count = lowered.matches(&entity.to_lowercase()).count() as u32;
                if count > 0 {
                    mentions.insert(entity.clone(), count);
                }
            }
        }
        _ => {
            for word in content.split_whitespace() {
                let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
                if trimmed.len() >= 3
                    && trimmed.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
                {
                    *mentions.entry(trimmed.to_string()).or_insert(0) += 1;
                }
            }
            if mentions.len() > 10 {
                let mut ranked: Vec<(String, u32)> = mentions.into_iter().collect();
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                ranked.truncate(10);
                mentions = ranked.into_iter().collect();
            }
        }
    }
    mentions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: String, relevance: f32) -> ContextChunk {
        let token_count = estimate_tokens(&content);
        ContextChunk {
            content,
            source: "test.md".to_string(),
            relevance,
            token_count,
        }
    }

    fn budget_config(max_context_tokens: usize) -> ContextConfig {
        ContextConfig {
            max_context_tokens,
            ..Default::default()
        }
    }

    #[test]
    fn token_budget_is_never_exceeded() {
        // Three chunks of ~40 tokens each under a 100-token budget: exactly
        // the first two fit, the third is skipped whole.
        let chunks = vec![
            chunk("a".repeat(157), 0.9),
            chunk("b".repeat(157), 0.8),
            chunk("c".repeat(157), 0.7),
        ];
        let config = budget_config(100);

        let context = assemble(chunks, None, &config, 120);
        assert!(context.token_count <= 100);
        assert!(context.content.contains('a'));
        assert!(context.content.contains('b'));
        assert!(!context.content.contains('c'));
    }

    #[test]
    fn overflowing_chunk_is_skipped_never_truncated() {
        let big = "sentence ".repeat(200);
        let small = "A short passage that fits fine.";
        let chunks = vec![chunk(big.clone(), 0.9), chunk(small.to_string(), 0.5)];
        let config = budget_config(50);

        let context = assemble(chunks, None, &config, 500);
        assert!(!context.content.contains("sentence sentence"));
        assert!(context.content.contains(small));
        assert!(context.token_count <= 50);
    }

    #[test]
    fn chunks_included_in_relevance_order() {
        let chunks = vec![
            chunk("low relevance passage.".to_string(), 0.2),
            chunk("high relevance passage.".to_string(), 0.9),
        ];
        let config = budget_config(4000);

        let context = assemble(chunks, None, &config, 20);
        let high_pos = context.content.find("high relevance").unwrap();
        let low_pos = context.content.find("low relevance").unwrap();
        assert!(high_pos < low_pos);
    }

    #[test]
    fn summary_takes_at_most_a_fifth_of_the_budget() {
        let mut conversation = ConversationContext {
            conversation_id: "c1".to_string(),
            messages: Default::default(),
            summary: Some("s".repeat(4000)),
            key_topics: Vec::new(),
            entities: HashMap::new(),
            last_updated: chrono::Utc::now(),
            context_window: 4000,
            compression_level: 5,
        };
        let config = budget_config(1000);

        // An oversized summary is left out entirely.
        let context = assemble(
            vec![chunk("body text.".to_string(), 0.5)],
            Some(&conversation),
            &config,
            10,
        );
        assert!(context.conversation_summary.is_none());

        // A small one is included.
        conversation.summary = Some("a compact recap of the conversation".to_string());
        let context = assemble(
            vec![chunk("body text.".to_string(), 0.5)],
            Some(&conversation),
            &config,
            10,
        );
        assert!(context.conversation_summary.is_some());
        assert!(context.content.contains("[Conversation Summary]"));
    }

    #[test]
    fn empty_input_produces_empty_context() {
        let config = budget_config(4000);
        let context = assemble(Vec::new(), None, &config, 0);
        assert!(context.content.is_empty());
        assert_eq!(context.token_count, 0);
        assert_eq!(context.relevance_score, 0.0);
    }

    #[test]
    fn entity_mentions_follow_conversation_entities() {
        let mut entities = HashMap::new();
        entities.insert("Tokio".to_string(), 3);
        entities.insert("Absent".to_string(), 1);
        let conversation = ConversationContext {
            conversation_id: "c1".to_string(),
            messages: Default::default(),
            summary: None,
            key_topics: Vec::new(),
            entities,
            last_updated: chrono::Utc::now(),
            context_window: 4000,
            compression_level: 5,
        };
        let config = budget_config(4000);

        let context = assemble(
            vec![chunk("Tokio schedules tasks. Tokio is a runtime.".to_string(), 0.8)],
            Some(&conversation),
            &config,
            20,
        );
        assert_eq!(context.entity_mentions.get("Tokio"), Some(&2));
        assert!(!context.entity_mentions.contains_key("Absent"));
    }

    #[test]
    fn sources_are_deduplicated_in_order() {
        let mut a = chunk("first passage.".to_string(), 0.9);
        a.source = "one.md".to_string();
        let mut b = chunk("second passage.".to_string(), 0.8);
        b.source = "one.md".to_string();
        let mut c = chunk("third passage.".to_string(), 0.7);
        c.source = "two.md".to_string();
        let config = budget_config(4000);

        let context = assemble(vec![a, b, c], None, &config, 30);
        assert_eq!(context.sources, vec!["one.md".to_string(), "two.md".to_string()]);
    }
}
