//! Multi-factor quality scoring per retrieved result.
//!
//! The overall score is a weighted blend:
//! relevance 0.30, diversity 0.15, completeness 0.15, coherence 0.15,
//! freshness 0.10, authority 0.15. The duplicate factor is informational
//! and not part of the blend.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::quality::dedup::content_similarity;
use crate::search::{ResultMetadata, SearchResult};

const W_RELEVANCE: f32 = 0.30;
const W_DIVERSITY: f32 = 0.15;
const W_COMPLETENESS: f32 = 0.15;
const W_COHERENCE: f32 = 0.15;
const W_FRESHNESS: f32 = 0.10;
const W_AUTHORITY: f32 = 0.15;

/// Content age at which freshness halves.
const FRESHNESS_HALF_LIFE_DAYS: f32 = 365.0;

#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityMetrics {
    pub relevance: f32,
    /// Highest similarity to any other result; 1.0 means an exact twin exists.
    pub duplicate: f32,
    pub diversity: f32,
    pub completeness: f32,
    pub coherence: f32,
    pub freshness: f32,
    pub authority: f32,
    pub overall: f32,
}

pub fn compute_metrics(result: &SearchResult, query: &str, all: &[SearchResult]) -> QualityMetrics {
    let relevance = relevance_score(result, query);
    let (duplicate, diversity) = diversity_scores(result, all);
    let completeness = completeness_score(result);
    let coherence = coherence_score(&result.content);
    let freshness = freshness_score(result.metadata.created_at);
    let authority = authority_score(&result.metadata);

    let overall = W_RELEVANCE * relevance
        + W_DIVERSITY * diversity
        + W_COMPLETENESS * completeness
        + W_COHERENCE * coherence
        + W_FRESHNESS * freshness
        + W_AUTHORITY * authority;

    QualityMetrics {
        relevance,
        duplicate,
        diversity,
        completeness,
        coherence,
        freshness,
        authority,
        overall: overall.clamp(0.0, 1.0),
    }
}

/// Weighted blend of the retrieval scores and contextual term overlap with
/// the query and title.
fn relevance_score(result: &SearchResult, query: &str) -> f32 {
    let mut contextual_target = result.content.clone();
    if let Some(title) = &result.metadata.title {
        contextual_target.push(' ');
        contextual_target.push_str(title);
    }
    let contextual = term_overlap(query, &contextual_target);

    (0.5 * result.semantic_score.max(0.0) + 0.3 * result.keyword_score + 0.2 * contextual)
        .clamp(0.0, 1.0)
}

/// duplicate = max pairwise similarity, diversity = product of
/// `(1 - similarity)` against every other result. A result identical to many
/// others scores near zero diversity.
fn diversity_scores(result: &SearchResult, all: &[SearchResult]) -> (f32, f32) {
    let mut max_similarity = 0.0f32;
    let mut diversity = 1.0f32;
    for other in all {
        if other.id == result.id {
            continue;
        }
        let similarity = content_similarity(&result.content, &other.content);
        max_similarity = max_similarity.max(similarity);
        diversity *= 1.0 - similarity;
    }
    (max_similarity, diversity.clamp(0.0, 1.0))
}

/// Content length, metadata completeness, surrounding context.
fn completeness_score(result: &SearchResult) -> f32 {
    let length = (result.content.len() as f32 / 400.0).min(1.0);

    let meta = &result.metadata;
    let fields = [
        meta.source.is_some(),
        meta.title.is_some(),
        meta.document_type.is_some(),
        meta.created_at.is_some(),
    ];
    let metadata_completeness =
        fields.iter().filter(|f| **f).count() as f32 / fields.len() as f32;

    let has_context = if meta.section.is_some() { 1.0 } else { 0.0 };

    0.5 * length + 0.3 * metadata_completeness + 0.2 * has_context
}

/// Sentence/paragraph structure heuristics with a repetition penalty.
pub(crate) fn coherence_score(content: &str) -> f32 {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }

    let sentences = content
        .split(|c| matches!(c, '.' | '!' | '?'))
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let avg_sentence_len = words.len() as f32 / sentences as f32;
    let structure = if (5.0..=30.0).contains(&avg_sentence_len) {
        1.0
    } else if avg_sentence_len < 5.0 {
        avg_sentence_len / 5.0
    } else {
        (30.0 / avg_sentence_len).max(0.3)
    };

    let unique: std::collections::HashSet<String> =
        words.iter().map(|w| w.to_lowercase()).collect();
    let repetition = unique.len() as f32 / words.len() as f32;

    (0.6 * structure + 0.4 * repetition).clamp(0.0, 1.0)
}

/// Exponential decay over content age; unknown age is neutral.
fn freshness_score(created_at: Option<DateTime<Utc>>) -> f32 {
    match created_at {
        Some(created) => {
            let age_days = (Utc::now() - created).num_days().max(0) as f32;
            (-std::f32::consts::LN_2 * age_days / FRESHNESS_HALF_LIFE_DAYS).exp()
        }
        None => 0.5,
    }
}

/// Document-type prior plus filename heuristics.
fn authority_score(metadata: &ResultMetadata) -> f32 {
    let mut score: f32 = match metadata.document_type.as_deref() {
        Some("pdf") => 0.8,
        Some("md") | Some("markdown") => 0.7,
        Some("doc") | Some("docx") => 0.7,
        Some("html") => 0.5,
        Some("txt") => 0.5,
        _ => 0.5,
    };

    if let Some(source) = &metadata.source {
        let lowered = source.to_lowercase();
        if ["official", "spec", "manual", "reference"]
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            score += 0.15;
        }
        if ["draft", "tmp", "scratch"].iter().any(|m| lowered.contains(m)) {
            score -= 0.1;
        }
    }

    score.clamp(0.0, 1.0)
}

/// Fraction of query terms present in the text.
pub(crate) fn term_overlap(query: &str, text: &str) -> f32 {
    let haystack = text.to_lowercase();
    let terms: Vec<&str> = query
        .split_whitespace()
        .filter(|t| t.len() >= 2)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let query_lower = query.to_lowercase();
    let matched = query_lower
        .split_whitespace()
        .filter(|t| t.len() >= 2 && haystack.contains(*t))
        .count();
    matched as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, content: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            chunk_id: format!("chunk-{id}"),
            document_id: format!("doc-{id}"),
            content: content.to_string(),
            metadata: Default::default(),
            semantic_score: 0.8,
            keyword_score: 0.5,
            relevance_score: 0.0,
            distance: 0.2,
            rank: 0,
        }
    }

    #[test]
    fn overall_is_bounded() {
        let results = vec![
            result("a", "Rust guarantees memory safety without garbage collection."),
            result("b", "Completely unrelated gardening advice for tomatoes."),
        ];
        let metrics = compute_metrics(&results[0], "rust memory safety", &results);
        assert!(metrics.overall >= 0.0 && metrics.overall <= 1.0);
        assert!(metrics.relevance > 0.0);
    }

    #[test]
    fn twin_results_kill_diversity() {
        let twin = "identical passage repeated verbatim in the corpus";
        let results = vec![result("a", twin), result("b", twin), result("c", twin)];
        let metrics = compute_metrics(&results[0], "anything", &results);
        assert!((metrics.duplicate - 1.0).abs() < 1e-6);
        assert!(metrics.diversity < 1e-6);
    }

    #[test]
    fn fresh_content_beats_old_content() {
        let mut fresh = result("a", "recent news item");
        fresh.metadata.created_at = Some(Utc::now());
        let mut old = result("b", "ancient news item");
        old.metadata.created_at = Some(Utc::now() - chrono::Duration::days(730));

        let all = vec![fresh.clone(), old.clone()];
        let fresh_metrics = compute_metrics(&fresh, "news", &all);
        let old_metrics = compute_metrics(&old, "news", &all);
        assert!(fresh_metrics.freshness > old_metrics.freshness);
        // two years is two half-lives
        assert!((old_metrics.freshness - 0.25).abs() < 0.02);
    }

    #[test]
    fn authority_rewards_official_sources() {
        let mut official = ResultMetadata::default();
        official.document_type = Some("pdf".to_string());
        official.source = Some("official-spec.pdf".to_string());

        let mut scratch = ResultMetadata::default();
        scratch.source = Some("scratch-notes.txt".to_string());

        assert!(authority_score(&official) > authority_score(&scratch));
    }

    #[test]
    fn repetitive_content_scores_low_coherence() {
        let repetitive = "word word word word word word word word word word";
        let varied = "The parser reads input tokens. It builds a tree. Errors are reported early.";
        assert!(coherence_score(varied) > coherence_score(repetitive));
    }
}
