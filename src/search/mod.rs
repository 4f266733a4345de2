//! Search & Cache Engine.
//!
//! Produces a ranked raw result set for a query with bounded latency,
//! reusing prior work when possible:
//! - query text optimization (memoized)
//! - response cache keyed by `(optimized query, scope, filters, config)`
//! - semantic and keyword retrieval running concurrently, merged
//!   deterministically by score
//! - FIFO backpressure once the in-flight bound is reached

pub mod cache;
pub mod index;
pub mod query;

pub use cache::{CacheStats, CacheSweeperHandle, ResponseCache};
pub use index::{DocumentIndex, InMemoryDocumentIndex, IndexedDocument, KeywordHit};
pub use query::QueryOptimizer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use crate::core::errors::RagError;
use crate::embedding::EmbeddingService;
use crate::store::{VectorFilter, VectorMatch, VectorStoreOptimizer};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub source: Option<String>,
    pub title: Option<String>,
    pub document_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub section: Option<String>,
}

/// One retrieved passage. Created fresh per query, never persisted; each
/// pipeline stage produces a new sequence instead of mutating in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ResultMetadata,
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub relevance_score: f32,
    pub distance: f32,
    pub rank: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub document_ids: Option<Vec<String>>,
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub top_k: usize,
    pub keyword_enabled: bool,
    pub min_score: Option<f32>,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub cache_max_bytes: usize,
    /// Clip overlong content fields in the cached copy.
    pub cache_compression: bool,
    pub cache_clip_chars: usize,
    /// Maximum simultaneous in-flight searches.
    pub max_concurrent: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            keyword_enabled: true,
            min_score: None,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            cache_ttl_secs: 300,
            cache_max_entries: 512,
            cache_max_bytes: 8 << 20,
            cache_compression: false,
            cache_clip_chars: 2000,
            max_concurrent: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInfo {
    pub hit: bool,
    pub key: String,
    pub age_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTimings {
    pub total_ms: u64,
    pub retrieval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub optimized_query: String,
    pub total_matches: usize,
    pub cache_info: CacheInfo,
    pub timings: SearchTimings,
}

pub struct SearchEngine {
    optimizer: Arc<VectorStoreOptimizer>,
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<EmbeddingService>,
    cache: Arc<ResponseCache>,
    queries: QueryOptimizer,
    limiter: Arc<Semaphore>,
    config: SearchConfig,
    collection: String,
}

impl SearchEngine {
    pub fn new(
        optimizer: Arc<VectorStoreOptimizer>,
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<EmbeddingService>,
        collection: impl Into<String>,
        config: SearchConfig,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
            config.cache_max_bytes,
        ));
        let limiter = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            optimizer,
            index,
            embedder,
            cache,
            queries: QueryOptimizer::new(),
            limiter,
            config,
            collection: collection.into(),
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run the full search pipeline for one query.
    pub async fn search(
        &self,
        raw_query: &str,
        scope: Option<&str>,
        filters: &SearchFilters,
    ) -> Result<SearchResponse, RagError> {
        let raw_query = raw_query.trim();
        if raw_query.is_empty() {
            return Err(RagError::invalid("empty query"));
        }

        // FIFO backpressure: callers past the bound queue in arrival order.
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(RagError::internal)?;

        let started = Instant::now();
        let optimized = self.queries.optimize(raw_query);
        let key = cache_key(&optimized, scope, filters, &self.config);

        if let Some((mut cached, age)) = self.cache.get(&key).await {
            cached.cache_info = CacheInfo {
                hit: true,
                key,
                age_ms: age.as_millis() as u64,
            };
            tracing::debug!("Cache hit for '{}'", optimized);
            return Ok(cached);
        }

        let batch = self.embedder.embed(&[optimized.clone()]).await?;
        let query_vector = batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| RagError::upstream("embedding", "empty embedding response"))?;

        let terms = if self.config.keyword_enabled {
            query::query_terms(&optimized)
        } else {
            Vec::new()
        };

        let fetch = (self.config.top_k * 2).max(self.config.top_k);
        let vector_filter = filters.document_ids.clone().map(|ids| VectorFilter {
            document_ids: Some(ids),
        });

        let retrieval_started = Instant::now();
        let (semantic, keyword) = tokio::join!(
            self.optimizer
                .query(&self.collection, &query_vector, fetch, vector_filter.as_ref()),
            self.index.search_terms(&terms, fetch),
        );

        // Semantic failure fails the call; ranking cannot be trusted without it.
        let semantic = semantic?;
        let keyword = match keyword {
            Ok(hits) => hits,
            Err(err) if !semantic.is_empty() => {
                tracing::warn!("Keyword retrieval failed, continuing on semantic: {}", err);
                Vec::new()
            }
            Err(err) => return Err(RagError::upstream("document_index", err)),
        };
        let retrieval_ms = retrieval_started.elapsed().as_millis() as u64;

        let mut results = merge_results(semantic, keyword, &self.config);

        if let Some(allowed) = &filters.sources {
            results.retain(|r| {
                r.metadata
                    .source
                    .as_ref()
                    .map(|s| allowed.contains(s))
                    .unwrap_or(false)
            });
        }
        if let Some(min_score) = self.config.min_score {
            results.retain(|r| r.relevance_score >= min_score);
        }

        let total_matches = results.len();
        results.truncate(self.config.top_k);
        for (rank, result) in results.iter_mut().enumerate() {
            result.rank = rank;
        }

        let response = SearchResponse {
            results,
            optimized_query: optimized,
            total_matches,
            cache_info: CacheInfo {
                hit: false,
                key: key.clone(),
                age_ms: 0,
            },
            timings: SearchTimings {
                total_ms: started.elapsed().as_millis() as u64,
                retrieval_ms,
            },
        };

        let (cache_copy, compressed) = if self.config.cache_compression {
            clip_response(&response, self.config.cache_clip_chars)
        } else {
            (response.clone(), false)
        };
        self.cache.insert(key, cache_copy, compressed).await;

        Ok(response)
    }
}

/// Merge semantic and keyword hits into one deterministic ranking:
/// blended score descending, id as the tie-break.
fn merge_results(
    semantic: Vec<VectorMatch>,
    keyword: Vec<KeywordHit>,
    config: &SearchConfig,
) -> Vec<SearchResult> {
    let mut by_id: HashMap<String, SearchResult> = HashMap::new();

    for found in semantic {
        let record = found.record;
        by_id.insert(
            record.id.clone(),
            SearchResult {
                id: record.id.clone(),
                chunk_id: record.chunk_id,
                document_id: record.document_id,
                content: record.content,
                metadata: ResultMetadata {
                    source: record.metadata.source,
                    title: None,
                    document_type: record.metadata.document_type,
                    created_at: Some(record.metadata.created_at),
                    section: None,
                },
                semantic_score: found.score,
                keyword_score: 0.0,
                relevance_score: 0.0,
                distance: 1.0 - found.score,
                rank: 0,
            },
        );
    }

    for hit in keyword {
        match by_id.get_mut(&hit.id) {
            Some(existing) => existing.keyword_score = hit.score,
            None => {
                by_id.insert(
                    hit.id.clone(),
                    SearchResult {
                        id: hit.id,
                        chunk_id: hit.chunk_id,
                        document_id: hit.document_id,
                        content: hit.content,
                        metadata: hit.metadata,
                        semantic_score: 0.0,
                        keyword_score: hit.score,
                        relevance_score: 0.0,
                        distance: 1.0,
                        rank: 0,
                    },
                );
            }
        }
    }

    let mut results: Vec<SearchResult> = by_id.into_values().collect();
    for result in results.iter_mut() {
        result.relevance_score = config.semantic_weight * result.semantic_score
            + config.keyword_weight * result.keyword_score;
    }

    results.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results
}

fn cache_key(
    optimized: &str,
    scope: Option<&str>,
    filters: &SearchFilters,
    config: &SearchConfig,
) -> String {
    let payload = serde_json::json!({
        "query": optimized,
        "scope": scope,
        "filters": filters,
        "top_k": config.top_k,
        "keyword": config.keyword_enabled,
        "min_score": config.min_score,
        "weights": [config.semantic_weight, config.keyword_weight],
    });

    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn clip_response(response: &SearchResponse, clip_chars: usize) -> (SearchResponse, bool) {
    let mut copy = response.clone();
    let mut clipped = false;
    for result in copy.results.iter_mut() {
        if result.content.chars().count() > clip_chars {
            result.content = result.content.chars().take(clip_chars).collect();
            clipped = true;
        }
    }
    (copy, clipped)
}
