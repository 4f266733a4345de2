//! Vector Store Optimizer.
//!
//! Owns persisted embeddings: deduplicates, compresses and tiers items on
//! their way to the backend, and tracks access frequency so cold items can
//! be re-tagged by the idle sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::errors::RagError;
use crate::store::compression::{self, CompressionAlgorithm};
use crate::store::dedup::DuplicateDetector;
use crate::store::{EmbeddingRecord, StorageTier, VectorFilter, VectorMatch, VectorStore};

const MAX_STORE_RETRIES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMethod {
    /// One backend call for the whole batch; fails atomically.
    Bulk,
    /// Sub-batches; a failing sub-batch never blocks the others.
    Batch,
    /// One backend call per item.
    Stream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub dedup_enabled: bool,
    /// Cosine similarity above which an item is a semantic duplicate.
    pub semantic_duplicate_threshold: f32,
    /// How many recently stored vectors the semantic check scans.
    pub recent_window: usize,
    pub compression_enabled: bool,
    pub compression_algorithm: CompressionAlgorithm,
    /// 1-9, higher = more loss.
    pub compression_level: u8,
    /// A compressed vector below this quality is discarded.
    pub compression_quality_floor: f32,
    /// Access count at or above which an item counts as hot.
    pub hot_access_threshold: u64,
    /// Days without access before the idle sweep re-tags an item cold.
    pub cold_after_days: i64,
    pub batch_size: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            dedup_enabled: true,
            semantic_duplicate_threshold: 0.95,
            recent_window: 256,
            compression_enabled: true,
            compression_algorithm: CompressionAlgorithm::Quantization,
            compression_level: 3,
            compression_quality_floor: 0.8,
            hot_access_threshold: 10,
            cold_after_days: 30,
            batch_size: 64,
        }
    }
}

/// A storage failure scoped to one item. The batch keeps going.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub error: String,
    pub batch_index: usize,
    pub recoverable: bool,
}

/// A dropped duplicate pointing at the item it duplicates.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateRef {
    pub original_id: String,
    pub duplicate_id: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageMetrics {
    pub duration_ms: u64,
    pub compressed: usize,
    pub duplicates_skipped: usize,
}

#[derive(Debug, Serialize)]
pub struct StorageResult {
    pub stored: usize,
    pub failed: usize,
    pub errors: Vec<ItemFailure>,
    pub duplicate_groups: Vec<DuplicateRef>,
    pub metrics: StorageMetrics,
}

#[derive(Debug, Clone)]
struct AccessStat {
    count: u64,
    last_access: DateTime<Utc>,
}

/// Handle for the periodic idle sweep; abort on drop is deliberate so the
/// task never outlives its owner.
pub struct IdleSweepHandle {
    handle: JoinHandle<()>,
}

impl IdleSweepHandle {
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for IdleSweepHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct VectorStoreOptimizer {
    store: Arc<dyn VectorStore>,
    config: OptimizerConfig,
    dedup: Mutex<DuplicateDetector>,
    access: Mutex<HashMap<String, AccessStat>>,
}

impl VectorStoreOptimizer {
    pub fn new(store: Arc<dyn VectorStore>, config: OptimizerConfig) -> Self {
        let dedup = DuplicateDetector::new(
            config.recent_window,
            config.semantic_duplicate_threshold,
        );
        Self {
            store,
            config,
            dedup: Mutex::new(dedup),
            access: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Deduplicate, compress and persist a batch of embeddings.
    pub async fn store_vectors(
        &self,
        collection: &str,
        items: Vec<EmbeddingRecord>,
        method: StoreMethod,
    ) -> Result<StorageResult, RagError> {
        if items.is_empty() {
            return Err(RagError::invalid("empty batch"));
        }
        for item in &items {
            if item.vector.is_empty() {
                return Err(RagError::invalid(format!(
                    "item '{}' has no embedding",
                    item.id
                )));
            }
            if item.content.trim().is_empty() {
                return Err(RagError::invalid(format!(
                    "item '{}' has no source content",
                    item.id
                )));
            }
        }

        let started = Instant::now();

        // 1. Duplicate detection; matches are dropped, not replaced.
        let mut duplicate_groups = Vec::new();
        let mut survivors: Vec<EmbeddingRecord> = Vec::with_capacity(items.len());
        if self.config.dedup_enabled {
            let mut dedup = self.dedup.lock().await;
            for item in items {
                match dedup.check(&item.content, &item.vector) {
                    Some(found) => {
                        tracing::debug!(
                            "Dropping duplicate '{}' of '{}' ({:?}, similarity {:.3})",
                            item.id,
                            found.original_id,
                            found.kind,
                            found.similarity
                        );
                        duplicate_groups.push(DuplicateRef {
                            original_id: found.original_id,
                            duplicate_id: item.id,
                            similarity: found.similarity,
                        });
                    }
                    None => {
                        dedup.record(&item.id, &item.content, &item.vector);
                        survivors.push(item);
                    }
                }
            }
        } else {
            survivors = items;
        }

        // 2. Per-vector compression, gated on measured quality.
        let mut compressed = 0;
        if self.config.compression_enabled {
            for item in survivors.iter_mut() {
                let outcome = compression::compress(
                    &item.vector,
                    self.config.compression_algorithm,
                    self.config.compression_level,
                    self.config.compression_quality_floor,
                );
                if outcome.applied {
                    item.vector = outcome.vector;
                    item.metadata.compressed = true;
                    item.metadata.compression_algorithm = Some(outcome.algorithm);
                    compressed += 1;
                }
            }
        }

        // 3. Persistence per the chosen method.
        let mut errors: Vec<ItemFailure> = Vec::new();
        let mut stored = 0;

        match method {
            StoreMethod::Bulk => match self.add_with_retries(collection, &survivors).await {
                Ok(()) => stored = survivors.len(),
                Err(err) => {
                    for item in &survivors {
                        errors.push(ItemFailure {
                            item_id: item.id.clone(),
                            error: err.to_string(),
                            batch_index: 0,
                            recoverable: true,
                        });
                    }
                }
            },
            StoreMethod::Batch => {
                for (batch_index, chunk) in survivors.chunks(self.config.batch_size).enumerate() {
                    match self.add_with_retries(collection, chunk).await {
                        Ok(()) => stored += chunk.len(),
                        Err(err) => {
                            tracing::warn!(
                                "Sub-batch {} failed, continuing with the rest: {}",
                                batch_index,
                                err
                            );
                            for item in chunk {
                                errors.push(ItemFailure {
                                    item_id: item.id.clone(),
                                    error: err.to_string(),
                                    batch_index,
                                    recoverable: true,
                                });
                            }
                        }
                    }
                }
            }
            StoreMethod::Stream => {
                for (batch_index, item) in survivors.iter().enumerate() {
                    match self
                        .add_with_retries(collection, std::slice::from_ref(item))
                        .await
                    {
                        Ok(()) => stored += 1,
                        Err(err) => errors.push(ItemFailure {
                            item_id: item.id.clone(),
                            error: err.to_string(),
                            batch_index,
                            recoverable: true,
                        }),
                    }
                }
            }
        }

        let metrics = StorageMetrics {
            duration_ms: started.elapsed().as_millis() as u64,
            compressed,
            duplicates_skipped: duplicate_groups.len(),
        };

        tracing::info!(
            "store_vectors: stored {} of {} ({} duplicates, {} compressed, {} failed)",
            stored,
            stored + errors.len() + duplicate_groups.len(),
            duplicate_groups.len(),
            compressed,
            errors.len()
        );

        Ok(StorageResult {
            stored,
            failed: errors.len(),
            errors,
            duplicate_groups,
            metrics,
        })
    }

    /// Query the backend and record access for tiering.
    pub async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<Vec<VectorMatch>, RagError> {
        let matches = self
            .store
            .query(collection, vector, top_k, filter)
            .await
            .map_err(|e| RagError::upstream("vector_store", e))?;

        let now = Utc::now();
        let mut access = self.access.lock().await;
        for found in &matches {
            let stat = access
                .entry(found.record.id.clone())
                .or_insert_with(|| AccessStat {
                    count: 0,
                    last_access: now,
                });
            stat.count += 1;
            stat.last_access = now;
        }

        Ok(matches)
    }

    /// Current tier of an item by access count.
    pub async fn tier_of(&self, id: &str) -> StorageTier {
        let access = self.access.lock().await;
        match access.get(id) {
            Some(stat) if stat.count >= self.config.hot_access_threshold => StorageTier::Hot,
            _ => StorageTier::Cold,
        }
    }

    /// Re-tag items idle past the inactivity window as cold. Returns the
    /// number of migrated items. Migration only changes the storage class.
    pub async fn run_idle_sweep(&self, collection: &str) -> Result<usize, RagError> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.cold_after_days);
        let idle_ids: Vec<String> = {
            let access = self.access.lock().await;
            access
                .iter()
                .filter(|(_, stat)| stat.last_access <= cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut migrated = 0;
        for id in idle_ids {
            match self.store.set_tier(collection, &id, StorageTier::Cold).await {
                Ok(()) => migrated += 1,
                Err(err) => tracing::warn!("Idle sweep could not re-tag '{}': {}", id, err),
            }
        }

        if migrated > 0 {
            tracing::info!("Idle sweep migrated {} items to cold storage", migrated);
        }
        Ok(migrated)
    }

    /// Spawn the periodic idle sweep. The returned handle stops it.
    pub fn start_idle_sweep(
        self: &Arc<Self>,
        collection: impl Into<String>,
        every: Duration,
    ) -> IdleSweepHandle {
        let optimizer = Arc::clone(self);
        let collection = collection.into();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if let Err(err) = optimizer.run_idle_sweep(&collection).await {
                    tracing::warn!("Idle sweep failed: {}", err);
                }
            }
        });
        IdleSweepHandle { handle }
    }

    /// Forget recorded fingerprints, e.g. after a collection reset.
    pub async fn clear_dedup_state(&self) {
        self.dedup.lock().await.clear();
    }

    async fn add_with_retries(
        &self,
        collection: &str,
        records: &[EmbeddingRecord],
    ) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            match self.store.add(collection, records.to_vec()).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < MAX_STORE_RETRIES => {
                    let backoff = Duration::from_millis(100 * (1 << attempt));
                    tracing::warn!(
                        "Vector store add failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        MAX_STORE_RETRIES,
                        backoff,
                        err
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
