//! In-memory document cache keyed by source URL

use crate::types::{CacheEntry, CacheStats};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A count-capped cache of fetched documents
///
/// Entries are keyed by the exact source URL string. Staleness is advisory:
/// a stale entry reads as a miss but stays in the map until the next
/// successful fetch overwrites it or an eviction sweep removes it.
pub struct PdfCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    /// Soft cap on entry count, checked after every insert
    max_entries: usize,
    /// Number of oldest entries removed per sweep
    evict_batch: usize,
    /// Freshness window in seconds
    ttl_secs: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PdfCache {
    pub fn new(max_entries: usize, evict_batch: usize, ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries,
            evict_batch,
            ttl_secs,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a fresh entry from the cache
    ///
    /// Returns None for both absent and stale entries; stale entries are
    /// left in place to be overwritten by the caller's refetch.
    pub async fn get(&self, url: &str) -> Option<CacheEntry> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(url).cloned()
        };

        if let Some(entry) = entry {
            if entry.is_fresh(self.ttl_secs) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(url = %url, "Cache hit");
                return Some(entry);
            }
            debug!(url = %url, ttl_secs = self.ttl_secs, "Cache entry stale");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert an entry, overwriting any existing one for the same URL
    ///
    /// Runs the eviction sweep under the same write lock, so the size cap
    /// holds even with concurrent inserts in flight.
    pub async fn put(&self, url: &str, entry: CacheEntry) {
        let size = entry.data.len();
        let mut entries = self.entries.write().await;
        entries.insert(url.to_string(), entry);
        debug!(url = %url, size, "Cached document");

        if entries.len() > self.max_entries {
            Self::evict_oldest(&mut entries, self.evict_batch);
        }
    }

    /// Remove the `n` entries with the smallest `stored_at`
    fn evict_oldest(entries: &mut HashMap<String, CacheEntry>, n: usize) {
        let mut by_age: Vec<(String, chrono::DateTime<chrono::Utc>)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.stored_at))
            .collect();
        by_age.sort_by_key(|(_, stored_at)| *stored_at);

        for (key, _) in by_age.into_iter().take(n) {
            entries.remove(&key);
            debug!(url = %key, "Evicted oldest cache entry");
        }
    }

    /// Number of entries currently held, fresh or stale
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
