//! Quality & Reranking Engine.
//!
//! Turns a raw result set into a deduplicated, diverse, quality-filtered,
//! reordered set. Operates purely on result and query data; never fails on
//! an empty input — an empty report with zero scores is a valid outcome.

pub mod dedup;
pub mod rerank;
pub mod scoring;

pub use dedup::DuplicateGroup;
pub use rerank::{ImprovementDeltas, RerankStrategy};
pub use scoring::QualityMetrics;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::search::SearchResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Pairwise similarity above which results count as duplicates.
    pub duplicate_threshold: f32,
    /// Results below this overall score are removed when filtering is on.
    pub min_quality: f32,
    pub filtering_enabled: bool,
    pub strategy: RerankStrategy,
    pub quality_weight: f32,
    pub diversity_weight: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.85,
            min_quality: 0.5,
            filtering_enabled: true,
            strategy: RerankStrategy::ScoreBased,
            quality_weight: 0.7,
            diversity_weight: 0.3,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QualityReport {
    pub results: Vec<SearchResult>,
    /// Metrics per result id, for the query this report was built for.
    pub metrics: HashMap<String, QualityMetrics>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub removed_low_quality: usize,
    pub improvement: ImprovementDeltas,
}

impl QualityReport {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            metrics: HashMap::new(),
            duplicate_groups: Vec::new(),
            removed_low_quality: 0,
            improvement: ImprovementDeltas::default(),
        }
    }
}

pub struct QualityEngine {
    config: QualityConfig,
    /// Quality is query-specific and queries rarely repeat verbatim outside
    /// the response cache, so entries live until an explicit clear.
    cache: Mutex<HashMap<(String, String), QualityMetrics>>,
}

impl QualityEngine {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Score, deduplicate, filter and rerank a result set.
    pub fn evaluate(&self, results: &[SearchResult], query: &str) -> QualityReport {
        if results.is_empty() {
            return QualityReport::empty();
        }

        // 1. Quality metrics, cached by (result id, query).
        let mut metrics: HashMap<String, QualityMetrics> = HashMap::new();
        {
            let mut cache = self.cache.lock().unwrap();
            for result in results {
                let key = (result.id.clone(), query.to_string());
                let entry = cache
                    .entry(key)
                    .or_insert_with(|| scoring::compute_metrics(result, query, results));
                metrics.insert(result.id.clone(), entry.clone());
            }
        }

        // 2. Duplicate removal; the first encountered representative survives.
        let duplicate_groups =
            dedup::find_duplicate_groups(results, self.config.duplicate_threshold);
        let deduped = dedup::remove_duplicates(results, &duplicate_groups);

        // 3. Quality floor.
        let before_filter = deduped.len();
        let filtered: Vec<SearchResult> = if self.config.filtering_enabled {
            deduped
                .into_iter()
                .filter(|r| {
                    metrics
                        .get(&r.id)
                        .map(|m| m.overall >= self.config.min_quality)
                        .unwrap_or(false)
                })
                .collect()
        } else {
            deduped
        };
        let removed_low_quality = before_filter - filtered.len();

        // 4. Rerank.
        let reranked = rerank::rerank(
            filtered,
            &metrics,
            self.config.strategy,
            self.config.quality_weight,
            self.config.diversity_weight,
        );

        let improvement = rerank::improvement(results, &reranked, &metrics);

        tracing::debug!(
            "Quality pass: {} -> {} results ({} duplicates, {} below floor)",
            results.len(),
            reranked.len(),
            duplicate_groups
                .iter()
                .map(|g| g.duplicate_indices.len())
                .sum::<usize>(),
            removed_low_quality
        );

        QualityReport {
            results: reranked,
            metrics,
            duplicate_groups,
            removed_low_quality,
            improvement,
        }
    }

    /// Drop all cached quality metrics.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, content: &str, semantic: f32) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            chunk_id: format!("chunk-{id}"),
            document_id: format!("doc-{id}"),
            content: content.to_string(),
            metadata: Default::default(),
            semantic_score: semantic,
            keyword_score: 0.3,
            relevance_score: semantic,
            distance: 1.0 - semantic,
            rank: 0,
        }
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let engine = QualityEngine::new(QualityConfig::default());
        let report = engine.evaluate(&[], "anything");
        assert!(report.results.is_empty());
        assert_eq!(report.improvement.quality, 0.0);
    }

    #[test]
    fn duplicates_are_removed_once() {
        let engine = QualityEngine::new(QualityConfig {
            filtering_enabled: false,
            ..Default::default()
        });
        let results = vec![
            result("a", "the exact same passage appears twice here", 0.9),
            result("b", "the exact same passage appears twice here", 0.8),
            result("c", "an unrelated passage about something else", 0.7),
        ];

        let report = engine.evaluate(&results, "passage");
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.duplicate_groups.len(), 1);
        assert!(report.results.iter().any(|r| r.id == "a"));
        assert!(!report.results.iter().any(|r| r.id == "b"));
    }

    #[test]
    fn filtering_removes_low_quality() {
        let engine = QualityEngine::new(QualityConfig {
            min_quality: 0.9,
            ..Default::default()
        });
        let results = vec![result("a", "short", 0.1)];

        let report = engine.evaluate(&results, "unrelated query terms");
        assert!(report.results.is_empty());
        assert_eq!(report.removed_low_quality, 1);
    }

    #[test]
    fn metrics_cache_survives_until_cleared() {
        let engine = QualityEngine::new(QualityConfig {
            filtering_enabled: false,
            ..Default::default()
        });
        let results = vec![result("a", "some cached passage", 0.5)];

        let first = engine.evaluate(&results, "cached passage");
        let second = engine.evaluate(&results, "cached passage");
        assert_eq!(
            first.metrics["a"].overall,
            second.metrics["a"].overall
        );

        engine.clear_cache();
        let third = engine.evaluate(&results, "cached passage");
        assert!(third.metrics.contains_key("a"));
    }
}
