//! Core types for the PDF proxy

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Content type used when the upstream does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/pdf";

/// A cached document, keyed in the store by its exact source URL
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Vec<u8>,
    pub content_type: String,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry stamped with the current time
    pub fn new(data: Vec<u8>, content_type: String) -> Self {
        Self {
            data,
            content_type,
            stored_at: Utc::now(),
        }
    }

    /// Whether the entry is still within its freshness window
    pub fn is_fresh(&self, ttl_secs: u64) -> bool {
        Utc::now() - self.stored_at < Duration::seconds(ttl_secs as i64)
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Configuration for the proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    /// Soft cap on cached entries; exceeding it triggers an eviction sweep
    pub max_entries: usize,
    /// How many of the oldest entries one sweep removes
    pub evict_batch: usize,
    pub ttl_secs: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_attempts: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            max_entries: 50,
            evict_batch: 10,
            ttl_secs: 5 * 60,
            fetch_timeout_secs: 45,
            fetch_attempts: 3,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}
