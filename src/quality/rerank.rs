//! Reranking strategies over a quality-scored result set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::quality::dedup::content_similarity;
use crate::quality::scoring::QualityMetrics;
use crate::search::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankStrategy {
    /// Descending by overall quality.
    ScoreBased,
    /// Greedy marginal `quality*wq + (1 - max_sim_to_selected)*wd`.
    DiversityBased,
    /// Score-based first half, diversity-based second half, interleaved.
    Hybrid,
}

/// Measured deltas versus the unranked input, for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImprovementDeltas {
    pub relevance: f32,
    pub diversity: f32,
    pub quality: f32,
}

pub fn rerank(
    results: Vec<SearchResult>,
    metrics: &HashMap<String, QualityMetrics>,
    strategy: RerankStrategy,
    quality_weight: f32,
    diversity_weight: f32,
) -> Vec<SearchResult> {
    match strategy {
        RerankStrategy::ScoreBased => score_based(results, metrics),
        RerankStrategy::DiversityBased => {
            diversity_based(results, metrics, quality_weight, diversity_weight)
        }
        RerankStrategy::Hybrid => {
            let mid = results.len().div_ceil(2);
            let mut first: Vec<SearchResult> = results;
            let second = first.split_off(mid);

            let first = score_based(first, metrics);
            let second = diversity_based(second, metrics, quality_weight, diversity_weight);
            interleave(first, second)
        }
    }
}

fn overall(metrics: &HashMap<String, QualityMetrics>, result: &SearchResult) -> f32 {
    metrics.get(&result.id).map(|m| m.overall).unwrap_or(0.0)
}

fn score_based(
    mut results: Vec<SearchResult>,
    metrics: &HashMap<String, QualityMetrics>,
) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        overall(metrics, b)
            .partial_cmp(&overall(metrics, a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results
}

fn diversity_based(
    results: Vec<SearchResult>,
    metrics: &HashMap<String, QualityMetrics>,
    quality_weight: f32,
    diversity_weight: f32,
) -> Vec<SearchResult> {
    let mut remaining = results;
    let mut selected: Vec<SearchResult> = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (idx, candidate) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| content_similarity(&candidate.content, &s.content))
                .fold(0.0f32, f32::max);
            let marginal =
                overall(metrics, candidate) * quality_weight + (1.0 - max_sim) * diversity_weight;
            if marginal > best_score {
                best_score = marginal;
                best_idx = idx;
            }
        }
        selected.push(remaining.remove(best_idx));
    }

    selected
}

fn interleave(first: Vec<SearchResult>, second: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut out = Vec::with_capacity(first.len() + second.len());
    let mut left = first.into_iter();
    let mut right = second.into_iter();

    loop {
        match (left.next(), right.next()) {
            (Some(a), Some(b)) => {
                out.push(a);
                out.push(b);
            }
            (Some(a), None) => out.push(a),
            (None, Some(b)) => out.push(b),
            (None, None) => break,
        }
    }
    out
}

/// Position-discounted improvement of the output ordering over the input.
pub fn improvement(
    before: &[SearchResult],
    after: &[SearchResult],
    metrics: &HashMap<String, QualityMetrics>,
) -> ImprovementDeltas {
    let score = |results: &[SearchResult], pick: fn(&QualityMetrics) -> f32| -> f32 {
        if results.is_empty() {
            return 0.0;
        }
        let mut weighted = 0.0;
        let mut norm = 0.0;
        for (i, result) in results.iter().enumerate() {
            let weight = 1.0 / (i as f32 + 1.0);
            let value = metrics.get(&result.id).map(pick).unwrap_or(0.0);
            weighted += weight * value;
            norm += weight;
        }
        weighted / norm
    };

    ImprovementDeltas {
        relevance: score(after, |m| m.relevance) - score(before, |m| m.relevance),
        diversity: score(after, |m| m.diversity) - score(before, |m| m.diversity),
        quality: score(after, |m| m.overall) - score(before, |m| m.overall),
    }
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
            semantic_score: 0.5,
            keyword_score: 0.0,
            relevance_score: 0.5,
            distance: 0.5,
            rank: 0,
        }
    }

    fn metrics_for(entries: &[(&str, f32)]) -> HashMap<String, QualityMetrics> {
        entries
            .iter()
            .map(|(id, overall)| {
                (
                    id.to_string(),
                    QualityMetrics {
                        overall: *overall,
                        relevance: *overall,
                        diversity: 0.5,
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn score_based_is_non_increasing() {
        let results = vec![
            result("low", "first passage"),
            result("high", "second passage"),
            result("mid", "third passage"),
        ];
        let metrics = metrics_for(&[("low", 0.2), ("high", 0.9), ("mid", 0.5)]);

        let ranked = rerank(results, &metrics, RerankStrategy::ScoreBased, 0.7, 0.3);
        let scores: Vec<f32> = ranked.iter().map(|r| metrics[&r.id].overall).collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert_eq!(ranked[0].id, "high");
    }

    #[test]
    fn diversity_based_never_picks_dominated_candidate() {
        let results = vec![
            result("a", "rust ownership and borrowing model"),
            result("b", "rust ownership and borrowing model"),
            result("c", "distributed consensus with raft"),
        ];
        let metrics = metrics_for(&[("a", 0.9), ("b", 0.9), ("c", 0.6)]);

        let ranked = rerank(results, &metrics, RerankStrategy::DiversityBased, 0.5, 0.5);
        // After "a" is picked, "b" is an exact twin with zero marginal
        // diversity; "c" must come second.
        assert_eq!(ranked[0].id, "a");
        assert_eq!(ranked[1].id, "c");
        assert_eq!(ranked[2].id, "b");
    }

    #[test]
    fn hybrid_interleaves_both_halves() {
        let results = vec![
            result("a", "alpha content"),
            result("b", "beta content"),
            result("c", "gamma content"),
            result("d", "delta content"),
        ];
        let metrics = metrics_for(&[("a", 0.1), ("b", 0.9), ("c", 0.5), ("d", 0.7)]);

        let ranked = rerank(results, &metrics, RerankStrategy::Hybrid, 0.7, 0.3);
        assert_eq!(ranked.len(), 4);
        // First half {a, b} score-ranked puts "b" first; positions then
        // alternate between the two halves.
        assert_eq!(ranked[0].id, "b");
        assert!(ranked[1].id == "c" || ranked[1].id == "d");
    }

    #[test]
    fn improvement_is_positive_when_reranking_helps() {
        let results = vec![
            result("worst", "one"),
            result("best", "two"),
        ];
        let metrics = metrics_for(&[("worst", 0.1), ("best", 0.9)]);

        let ranked = rerank(
            results.clone(),
            &metrics,
            RerankStrategy::ScoreBased,
            0.7,
            0.3,
        );
        let deltas = improvement(&results, &ranked, &metrics);
        assert!(deltas.quality > 0.0);
    }
}
