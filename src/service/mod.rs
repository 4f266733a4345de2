//! Smart RAG orchestrator.
//!
//! Sequences search -> source filtering -> quality -> context optimization
//! -> recommendation synthesis, aggregating per-stage timings and a
//! composite quality score. Performs no algorithmic work of its own beyond
//! composition; the first hard stage failure propagates. Every call runs
//! under an overall timeout — a timeout surfaces as an error, never as a
//! silently truncated context.

pub mod recommend;

pub use recommend::Recommendations;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::context::{chunking, ContextOptimizer, OptimizedContext};
use crate::core::config::PipelineConfig;
use crate::core::errors::RagError;
use crate::embedding::EmbeddingService;
use crate::quality::QualityEngine;
use crate::search::{CacheInfo, DocumentIndex, SearchEngine, SearchFilters, SearchResult};
use crate::store::VectorStoreOptimizer;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct SmartRagRequest {
    pub query: String,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub filters: SearchFilters,
    pub timeout_ms: Option<u64>,
}

impl SmartRagRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            conversation_id: None,
            user_id: None,
            agent_id: None,
            filters: SearchFilters::default(),
            timeout_ms: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_scope(
        mut self,
        user_id: Option<impl Into<String>>,
        agent_id: Option<impl Into<String>>,
    ) -> Self {
        self.user_id = user_id.map(Into::into);
        self.agent_id = agent_id.map(Into::into);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub search_ms: u64,
    pub filter_ms: u64,
    pub quality_ms: u64,
    pub context_ms: u64,
    pub recommend_ms: u64,
    pub total_ms: u64,
}

/// Weighted blend of relevance, diversity, credibility and coherence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompositeQuality {
    pub relevance: f32,
    pub diversity: f32,
    pub credibility: f32,
    pub coherence: f32,
    pub overall: f32,
}

#[derive(Debug, Serialize)]
pub struct SmartRagResponse {
    /// Unique id for this pipeline run, for log correlation.
    pub request_id: String,
    pub context: OptimizedContext,
    pub results: Vec<SearchResult>,
    pub recommendations: Recommendations,
    pub quality: CompositeQuality,
    pub timings: StageTimings,
    pub cache_info: CacheInfo,
}

pub struct SmartRagService {
    search: SearchEngine,
    quality: QualityEngine,
    context: ContextOptimizer,
}

impl SmartRagService {
    /// Wire the pipeline from explicitly owned parts. The configuration is
    /// validated here; nothing in the pipeline is a process-wide singleton.
    pub fn new(
        optimizer: Arc<VectorStoreOptimizer>,
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<EmbeddingService>,
        collection: impl Into<String>,
        config: PipelineConfig,
    ) -> Result<Self, RagError> {
        config.validate()?;

        let search = SearchEngine::new(
            optimizer,
            index,
            embedder,
            collection,
            config.search.clone(),
        );
        let quality = QualityEngine::new(config.quality.clone());
        let context = ContextOptimizer::new(config.context.clone());

        Ok(Self {
            search,
            quality,
            context,
        })
    }

    pub fn search_engine(&self) -> &SearchEngine {
        &self.search
    }

    pub fn quality_engine(&self) -> &QualityEngine {
        &self.quality
    }

    pub fn context_optimizer(&self) -> &ContextOptimizer {
        &self.context
    }

    /// Run the full pipeline for one request under its overall timeout.
    pub async fn process(&self, request: SmartRagRequest) -> Result<SmartRagResponse, RagError> {
        let timeout_ms = request.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.run(&request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Pipeline timed out after {} ms", timeout_ms);
                Err(RagError::Timeout(timeout_ms))
            }
        }
    }

    async fn run(&self, request: &SmartRagRequest) -> Result<SmartRagResponse, RagError> {
        let total_started = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();

        let scope = match (&request.user_id, &request.agent_id) {
            (Some(user), Some(agent)) => Some(format!("{user}/{agent}")),
            (Some(user), None) => Some(user.clone()),
            (None, Some(agent)) => Some(agent.clone()),
            (None, None) => None,
        };

        // 1. Search.
        let search_started = Instant::now();
        let search_response = self
            .search
            .search(&request.query, scope.as_deref(), &request.filters)
            .await?;
        let search_ms = search_started.elapsed().as_millis() as u64;

        // 2. Source filtering.
        let filter_started = Instant::now();
        let max_sources = self.context.config().max_sources;
        let mut filtered = search_response.results.clone();
        filtered.truncate(max_sources);
        let filter_ms = filter_started.elapsed().as_millis() as u64;

        // 3. Quality pass.
        let quality_started = Instant::now();
        let report = self
            .quality
            .evaluate(&filtered, &search_response.optimized_query);
        let quality_ms = quality_started.elapsed().as_millis() as u64;

        // 4. Context optimization.
        let context_started = Instant::now();
        if let Some(conversation_id) = &request.conversation_id {
            self.context
                .record_message(conversation_id, "user", &request.query)
                .await;
        }
        let context = self
            .context
            .optimize(&report.results, request.conversation_id.as_deref())
            .await;
        let context_ms = context_started.elapsed().as_millis() as u64;

        // 5. Recommendations.
        let recommend_started = Instant::now();
        let topics = if context.content.is_empty() {
            chunking::extract_topic_terms(&request.query, 5)
        } else {
            chunking::extract_topic_terms(&context.content, 5)
        };
        let recommendations = recommend::build_recommendations(
            &request.query,
            &topics,
            &context.entity_mentions,
            &context.key_insights,
        );
        let recommend_ms = recommend_started.elapsed().as_millis() as u64;

        let quality_score = composite_quality(&report, &context);

        tracing::info!(
            "Pipeline {} done: {} results, {} context tokens, overall quality {:.2}",
            request_id,
            report.results.len(),
            context.token_count,
            quality_score.overall
        );

        Ok(SmartRagResponse {
            request_id,
            context,
            results: report.results,
            recommendations,
            quality: quality_score,
            timings: StageTimings {
                search_ms,
                filter_ms,
                quality_ms,
                context_ms,
                recommend_ms,
                total_ms: total_started.elapsed().as_millis() as u64,
            },
            cache_info: search_response.cache_info,
        })
    }
}

fn composite_quality(
    report: &crate::quality::QualityReport,
    context: &OptimizedContext,
) -> CompositeQuality {
    let mean = |pick: fn(&crate::quality::QualityMetrics) -> f32| -> f32 {
        if report.results.is_empty() {
            return 0.0;
        }
        let sum: f32 = report
            .results
            .iter()
            .filter_map(|r| report.metrics.get(&r.id).map(pick))
            .sum();
        sum / report.results.len() as f32
    };

    let relevance = mean(|m| m.relevance);
    let diversity = mean(|m| m.diversity);
    let credibility = mean(|m| m.authority);
    let coherence = context.metadata.coherence_score;

    CompositeQuality {
        relevance,
        diversity,
        credibility,
        coherence,
        overall: 0.4 * relevance + 0.2 * diversity + 0.2 * credibility + 0.2 * coherence,
    }
}
