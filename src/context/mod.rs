//! Context Optimizer.
//!
//! Compresses and assembles quality-filtered results plus conversation
//! memory into a single token-bounded context block:
//! - chunking (semantic / adaptive / topic-based / standard)
//! - chunk compression (extractive / abstractive / hybrid) with a quality
//!   gate
//! - per-conversation memory with topics, entities and a rolling summary
//! - token-budgeted assembly that never truncates a chunk mid-way

pub mod assembler;
pub mod chunking;
pub mod compression;
pub mod memory;

pub use assembler::{ContextMetadata, OptimizedContext};
pub use chunking::{ChunkingStrategy, ContextChunk};
pub use compression::CompressionStrategy;
pub use memory::{ContextMessage, ConversationContext, ConversationMemory, MemoryMaintenanceHandle};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::search::SearchResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub max_context_tokens: usize,
    pub max_sources: usize,
    pub chunking: ChunkingStrategy,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap carried between adjacent chunks, in characters.
    pub chunk_overlap: usize,
    /// Sentence-boundary similarity below which semantic chunking may cut.
    pub boundary_similarity_threshold: f32,
    pub compression_enabled: bool,
    pub compression: CompressionStrategy,
    /// Target fraction of content kept by compression.
    pub compression_ratio: f32,
    /// Compressed chunks below this quality are discarded.
    pub compression_quality_floor: f32,
    /// Conversation-level compression intensity, 1-9.
    pub compression_level: u8,
    /// Bounded message ring per conversation.
    pub memory_size: usize,
    pub max_topics: usize,
    pub max_entities: usize,
    /// History length at which the summary starts regenerating.
    pub summary_min_messages: usize,
    /// Conversations idle past this are evicted by the sweep.
    pub idle_timeout_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 4000,
            max_sources: 10,
            chunking: ChunkingStrategy::Semantic,
            chunk_size: 500,
            chunk_overlap: 50,
            boundary_similarity_threshold: 0.3,
            compression_enabled: true,
            compression: CompressionStrategy::Extractive,
            compression_ratio: 0.6,
            compression_quality_floor: 0.8,
            compression_level: 5,
            memory_size: 10,
            max_topics: 10,
            max_entities: 20,
            summary_min_messages: 4,
            idle_timeout_secs: 1800,
        }
    }
}

pub struct ContextOptimizer {
    memory: Arc<ConversationMemory>,
    config: ContextConfig,
}

impl ContextOptimizer {
    pub fn new(config: ContextConfig) -> Self {
        let memory = Arc::new(ConversationMemory::new(&config));
        Self { memory, config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    /// Append a message to a conversation's bounded history.
    pub async fn record_message(&self, conversation_id: &str, role: &str, content: &str) {
        self.memory.record_message(conversation_id, role, content).await;
    }

    /// Start the periodic idle-conversation eviction.
    pub fn start_maintenance(&self, every: Duration) -> MemoryMaintenanceHandle {
        self.memory.start_maintenance(every)
    }

    /// Chunk, compress and assemble results into a token-bounded context.
    ///
    /// Never fails: empty input produces an empty context with zero scores.
    pub async fn optimize(
        &self,
        results: &[SearchResult],
        conversation_id: Option<&str>,
    ) -> OptimizedContext {
        let capped: &[SearchResult] = if results.len() > self.config.max_sources {
            &results[..self.config.max_sources]
        } else {
            results
        };

        let conversation = match conversation_id {
            Some(id) => self.memory.snapshot(id).await,
            None => None,
        };

        if capped.is_empty() {
            let mut empty = OptimizedContext::empty(self.config.chunking);
            if let Some(conv) = &conversation {
                empty.conversation_summary = conv.summary.clone();
            }
            return empty;
        }

        let original_token_count: usize = capped
            .iter()
            .map(|r| assembler::estimate_tokens(&r.content))
            .sum();

        let mut chunks = chunking::chunk_results(capped, &self.config);

        if self.config.compression_enabled {
            let entities: Vec<String> = conversation
                .as_ref()
                .map(|c| c.entities.keys().cloned().collect())
                .unwrap_or_default();

            for chunk in chunks.iter_mut() {
                let outcome = compression::compress_text(
                    &chunk.content,
                    self.config.compression,
                    self.config.compression_ratio,
                    &entities,
                    self.config.compression_quality_floor,
                );
                if outcome.applied {
                    chunk.content = outcome.content;
                    chunk.token_count = assembler::estimate_tokens(&chunk.content);
                }
            }
        }

        assembler::assemble(chunks, conversation.as_ref(), &self.config, original_token_count)
    }
}
