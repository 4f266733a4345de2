//! Vector storage: backend trait, record types and the in-memory backend.
//!
//! This module provides:
//! - `VectorStore` trait for abstraction over different vector databases
//! - `EmbeddingRecord` and its typed metadata
//! - `InMemoryVectorStore`, a brute-force cosine backend for tests and
//!   offline use
//! - `VectorStoreOptimizer` for dedup, compression and tiering before
//!   persistence

pub mod compression;
pub mod dedup;
pub mod optimizer;

pub use compression::CompressionAlgorithm;
pub use optimizer::{
    OptimizerConfig, StorageResult, StoreMethod, VectorStoreOptimizer,
};

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::vector_math::cosine_similarity;

/// Storage class assigned by access-frequency tiering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    Hot,
    Cold,
}

/// Typed metadata attached to a stored embedding.
///
/// Immutable after write except for the fields the optimizer owns
/// (compression flag, storage tier, duplicate pointer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub compressed: bool,
    pub compression_algorithm: Option<CompressionAlgorithm>,
    pub tier: StorageTier,
    pub duplicate_of: Option<String>,
    /// Whether the vector came from the deterministic fallback embedder.
    pub fallback_embedding: bool,
    pub source: Option<String>,
    pub document_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for EmbeddingMetadata {
    fn default() -> Self {
        Self {
            compressed: false,
            compression_algorithm: None,
            tier: StorageTier::Hot,
            duplicate_of: None,
            fallback_embedding: false,
            source: None,
            document_type: None,
            created_at: Utc::now(),
        }
    }
}

/// A stored embedding with its source content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub document_id: String,
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: EmbeddingMetadata,
}

/// A match returned by a vector query.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub record: EmbeddingRecord,
    /// Similarity score (higher is more similar).
    pub score: f32,
}

/// Payload filter for vector queries.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub document_ids: Option<Vec<String>>,
}

impl VectorFilter {
    fn matches(&self, record: &EmbeddingRecord) -> bool {
        match &self.document_ids {
            Some(ids) => ids.iter().any(|id| id == &record.document_id),
            None => true,
        }
    }
}

/// Abstract trait for vector storage backends.
///
/// The core treats the backend as at-least-once write and eventually
/// consistent read. Implementations can use Qdrant, an embedded database,
/// or the in-memory store below.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection with a fixed embedding dimension.
    async fn create_collection(&self, collection: &str, dimension: usize) -> anyhow::Result<()>;

    /// Add records to a collection.
    async fn add(&self, collection: &str, records: Vec<EmbeddingRecord>) -> anyhow::Result<()>;

    /// Query the top-k most similar records.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&VectorFilter>,
    ) -> anyhow::Result<Vec<VectorMatch>>;

    /// Re-tag the storage class of a record. Does not alter stored bytes.
    async fn set_tier(&self, collection: &str, id: &str, tier: StorageTier) -> anyhow::Result<()>;

    /// Delete a collection and everything in it.
    async fn delete_collection(&self, collection: &str) -> anyhow::Result<()>;

    /// Total record count in a collection.
    async fn count(&self, collection: &str) -> anyhow::Result<usize>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

struct Collection {
    dimension: usize,
    records: Vec<EmbeddingRecord>,
}

/// Brute-force cosine similarity backend. Fast enough for tens of
/// thousands of vectors, and the default for tests.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, collection: &str, dimension: usize) -> anyhow::Result<()> {
        let mut collections = self.collections.write().await;
        collections.entry(collection.to_string()).or_insert(Collection {
            dimension,
            records: Vec::new(),
        });
        Ok(())
    }

    async fn add(&self, collection: &str, records: Vec<EmbeddingRecord>) -> anyhow::Result<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection '{collection}'"))?;

        for record in &records {
            if record.vector.len() != coll.dimension {
                anyhow::bail!(
                    "dimension mismatch for '{}': expected {}, got {}",
                    record.id,
                    coll.dimension,
                    record.vector.len()
                );
            }
        }

        coll.records.extend(records);
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&VectorFilter>,
    ) -> anyhow::Result<Vec<VectorMatch>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection '{collection}'"))?;

        let mut matches: Vec<VectorMatch> = coll
            .records
            .iter()
            .filter(|r| filter.map(|f| f.matches(r)).unwrap_or(true))
            .filter_map(|r| {
                cosine_similarity(vector, &r.vector)
                    .ok()
                    .map(|score| VectorMatch {
                        record: r.clone(),
                        score,
                    })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn set_tier(&self, collection: &str, id: &str, tier: StorageTier) -> anyhow::Result<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection '{collection}'"))?;

        match coll.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.metadata.tier = tier;
                Ok(())
            }
            None => anyhow::bail!("unknown record '{id}'"),
        }
    }

    async fn delete_collection(&self, collection: &str) -> anyhow::Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(collection);
        Ok(())
    }

    async fn count(&self, collection: &str) -> anyhow::Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| c.records.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
pub(crate) fn test_record(id: &str, vector: Vec<f32>, content: &str) -> EmbeddingRecord {
    EmbeddingRecord {
        id: id.to_string(),
        document_id: format!("doc-{id}"),
        chunk_id: format!("chunk-{id}"),
        vector,
        content: content.to_string(),
        metadata: EmbeddingMetadata::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_query_returns_most_similar_first() {
        let store = InMemoryVectorStore::new();
        store.create_collection("docs", 3).await.unwrap();

        store
            .add(
                "docs",
                vec![
                    test_record("a", vec![1.0, 0.0, 0.0], "first"),
                    test_record("b", vec![0.0, 1.0, 0.0], "second"),
                ],
            )
            .await
            .unwrap();

        let matches = store
            .query("docs", &[0.9, 0.1, 0.0], 2, None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].record.id, "a");
    }

    #[tokio::test]
    async fn add_rejects_wrong_dimension() {
        let store = InMemoryVectorStore::new();
        store.create_collection("docs", 3).await.unwrap();

        let result = store
            .add("docs", vec![test_record("bad", vec![1.0, 0.0], "short")])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn query_honors_document_filter() {
        let store = InMemoryVectorStore::new();
        store.create_collection("docs", 2).await.unwrap();
        store
            .add(
                "docs",
                vec![
                    test_record("a", vec![1.0, 0.0], "first"),
                    test_record("b", vec![1.0, 0.0], "second"),
                ],
            )
            .await
            .unwrap();

        let filter = VectorFilter {
            document_ids: Some(vec!["doc-b".to_string()]),
        };
        let matches = store
            .query("docs", &[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].record.id, "b");
    }

    #[tokio::test]
    async fn set_tier_retags_without_touching_vector() {
        let store = InMemoryVectorStore::new();
        store.create_collection("docs", 2).await.unwrap();
        store
            .add("docs", vec![test_record("a", vec![0.5, 0.5], "content")])
            .await
            .unwrap();

        store.set_tier("docs", "a", StorageTier::Cold).await.unwrap();

        let matches = store.query("docs", &[0.5, 0.5], 1, None).await.unwrap();
        assert_eq!(matches[0].record.metadata.tier, StorageTier::Cold);
        assert_eq!(matches[0].record.vector, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn count_and_delete_collection() {
        let store = InMemoryVectorStore::new();
        store.create_collection("docs", 2).await.unwrap();
        store
            .add("docs", vec![test_record("a", vec![1.0, 0.0], "x")])
            .await
            .unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 1);

        store.delete_collection("docs").await.unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 0);
    }
}
