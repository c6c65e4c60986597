//! PDF Proxy - caching, retrying proxy for protected chapter documents
//!
//! Fetches PDF bytes from external origins on behalf of browser clients that
//! cannot reach those origins directly, caching responses in memory.

mod cache;
mod error;
mod fetch;
mod server;
mod types;

use crate::cache::PdfCache;
use crate::error::{PdfProxyError, Result};
use crate::fetch::PdfFetcher;
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ProxyConfig;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("pdf_proxy=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting PDF Proxy...");

    // Load configuration from environment
    let config = load_config();
    info!("Port: {}", config.port);
    info!(
        "Cache cap: {} entries, evicting {} per sweep",
        config.max_entries, config.evict_batch
    );
    info!("Cache TTL: {} seconds", config.ttl_secs);
    info!(
        "Fetch: {} attempts, {} second timeout each",
        config.fetch_attempts, config.fetch_timeout_secs
    );

    // Create cache and fetcher
    let cache = PdfCache::new(config.max_entries, config.evict_batch, config.ttl_secs);
    let fetcher = PdfFetcher::with_options(
        Duration::from_secs(config.fetch_timeout_secs),
        config.fetch_attempts,
    );

    // Create shared state
    let state: SharedState = Arc::new(ServerState::new(cache, fetcher));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| PdfProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

fn load_config() -> ProxyConfig {
    let defaults = ProxyConfig::default();

    ProxyConfig {
        port: env_or("PORT", defaults.port),
        max_entries: env_or("CACHE_MAX_ENTRIES", defaults.max_entries),
        evict_batch: env_or("CACHE_EVICT_BATCH", defaults.evict_batch),
        ttl_secs: env_or("CACHE_TTL_SECS", defaults.ttl_secs),
        fetch_timeout_secs: env_or("FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs),
        fetch_attempts: env_or("FETCH_ATTEMPTS", defaults.fetch_attempts),
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
