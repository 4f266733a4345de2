//! Keyword retrieval boundary.
//!
//! Semantic retrieval goes through the vector store; keyword retrieval goes
//! through a document index. The in-memory implementation scores by query
//! term overlap.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::search::ResultMetadata;
use crate::store::EmbeddingRecord;

/// A keyword match with its overlap score in [0, 1].
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub id: String,
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ResultMetadata,
    pub score: f32,
}

/// A document registered for keyword search.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub id: String,
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ResultMetadata,
}

impl IndexedDocument {
    /// Mirror a stored embedding into the keyword index.
    pub fn from_record(record: &EmbeddingRecord) -> Self {
        Self {
            id: record.id.clone(),
            chunk_id: record.chunk_id.clone(),
            document_id: record.document_id.clone(),
            content: record.content.clone(),
            metadata: ResultMetadata {
                source: record.metadata.source.clone(),
                title: None,
                document_type: record.metadata.document_type.clone(),
                created_at: Some(record.metadata.created_at),
                section: None,
            },
        }
    }
}

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Return documents matching any of the terms, best overlap first.
    async fn search_terms(&self, terms: &[String], limit: usize)
        -> anyhow::Result<Vec<KeywordHit>>;
}

#[derive(Default)]
pub struct InMemoryDocumentIndex {
    documents: RwLock<Vec<IndexedDocument>>,
}

impl InMemoryDocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn index(&self, documents: Vec<IndexedDocument>) {
        self.documents.write().await.extend(documents);
    }

    pub async fn clear(&self) {
        self.documents.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl DocumentIndex for InMemoryDocumentIndex {
    async fn search_terms(
        &self,
        terms: &[String],
        limit: usize,
    ) -> anyhow::Result<Vec<KeywordHit>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.documents.read().await;
        let mut hits: Vec<KeywordHit> = documents
            .iter()
            .filter_map(|doc| {
                let haystack = doc.content.to_lowercase();
                let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                if matched == 0 {
                    return None;
                }
                Some(KeywordHit {
                    id: doc.id.clone(),
                    chunk_id: doc.chunk_id.clone(),
                    document_id: doc.document_id.clone(),
                    content: doc.content.clone(),
                    metadata: doc.metadata.clone(),
                    score: matched as f32 / terms.len() as f32,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, content: &str) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            chunk_id: format!("chunk-{id}"),
            document_id: format!("doc-{id}"),
            content: content.to_string(),
            metadata: ResultMetadata::default(),
        }
    }

    #[tokio::test]
    async fn scores_by_term_overlap() {
        let index = InMemoryDocumentIndex::new();
        index
            .index(vec![
                doc("a", "the sky is blue today"),
                doc("b", "blue whales swim in the ocean"),
                doc("c", "red roses bloom in spring"),
            ])
            .await;

        let hits = index
            .search_terms(&["blue".to_string(), "sky".to_string()], 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_terms_return_nothing() {
        let index = InMemoryDocumentIndex::new();
        index.index(vec![doc("a", "anything")]).await;
        assert!(index.search_terms(&[], 10).await.unwrap().is_empty());
    }
}
