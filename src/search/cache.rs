//! Response cache with TTL expiry and LRU-style trimming.
//!
//! Entries expire after the configured TTL; when the cache still exceeds its
//! size bound after the TTL purge, least-recently-accessed entries are
//! evicted until it fits. The periodic sweep is an explicitly started and
//! stopped task owned by the cache's user, never an ambient timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::search::SearchResponse;

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub total_bytes: usize,
}

struct StoredEntry {
    response: SearchResponse,
    created_at: Instant,
    access_count: u64,
    last_accessed: Instant,
    size: usize,
    compressed: bool,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, StoredEntry>>,
    ttl: Duration,
    max_entries: usize,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch a response if present and within TTL. Returns the response and
    /// its age.
    pub async fn get(&self, key: &str) -> Option<(SearchResponse, Duration)> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.created_at.elapsed() <= self.ttl => {
                entry.access_count += 1;
                entry.last_accessed = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some((entry.response.clone(), entry.created_at.elapsed()))
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a response. Last writer wins for concurrent same-key misses.
    pub async fn insert(&self, key: String, response: SearchResponse, compressed: bool) {
        let size = response_size(&response);
        let now = Instant::now();

        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            StoredEntry {
                response,
                created_at: now,
                access_count: 0,
                last_accessed: now,
                size,
                compressed,
            },
        );
        Self::enforce_bounds(&mut entries, self.max_entries, self.max_bytes);
    }

    /// Purge expired entries, then trim back under the size bound.
    pub async fn sweep(&self) {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() <= self.ttl);
        let expired = before - entries.len();
        Self::enforce_bounds(&mut entries, self.max_entries, self.max_bytes);

        if expired > 0 {
            tracing::debug!("Cache sweep removed {} expired entries", expired);
        }
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len(),
            total_bytes: entries.values().map(|e| e.size).sum(),
        }
    }

    /// Spawn the periodic sweep. The returned handle stops it.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> CacheSweeperHandle {
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        });
        CacheSweeperHandle { handle }
    }

    fn enforce_bounds(
        entries: &mut HashMap<String, StoredEntry>,
        max_entries: usize,
        max_bytes: usize,
    ) {
        loop {
            let total_bytes: usize = entries.values().map(|e| e.size).sum();
            if entries.len() <= max_entries && total_bytes <= max_bytes {
                break;
            }

            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            entries.remove(&oldest);
        }
    }
}

pub struct CacheSweeperHandle {
    handle: JoinHandle<()>,
}

impl CacheSweeperHandle {
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for CacheSweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn response_size(response: &SearchResponse) -> usize {
    response
        .results
        .iter()
        .map(|r| r.content.len() + r.id.len())
        .sum::<usize>()
        + response.optimized_query.len()
}
