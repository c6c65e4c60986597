//! Upstream document fetching with retries and request coalescing

use crate::error::{PdfProxyError, Result};
use crate::types::DEFAULT_CONTENT_TYPE;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, warn};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Outcome shared with coalesced waiters; errors travel as the message string
type FlightResult = std::result::Result<(Vec<u8>, String), String>;

/// HTTP client for fetching documents from protected origins
///
/// Requests carry a browser navigation profile (user agent, accept headers,
/// Sec-Fetch-*) and no referrer, follow redirects, and are bounded by a
/// per-attempt timeout. Failed attempts are retried with exponential backoff.
pub struct PdfFetcher {
    client: Client,
    attempts: u32,
    /// In-flight fetches, keyed by URL, for request coalescing
    flights: Mutex<HashMap<String, broadcast::Sender<FlightResult>>>,
}

impl PdfFetcher {
    /// Create a fetcher with default settings (45 second timeout, 3 attempts)
    pub fn new() -> Self {
        Self::with_options(Duration::from_secs(45), 3)
    }

    /// Create a fetcher with a custom per-attempt timeout and attempt budget
    pub fn with_options(timeout: Duration, attempts: u32) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(header::ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
        headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .referer(false)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            attempts,
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a document, retrying failed attempts with exponential backoff
    ///
    /// Returns the full byte buffer and the upstream content type. A non-2xx
    /// status counts as a failure; the last attempt's error propagates once
    /// the budget is spent.
    pub async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String)> {
        let mut last_error = String::new();

        for attempt in 0..self.attempts {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1));
                debug!(url = %url, attempt, delay_secs = delay.as_secs(), "Backing off before retry");
                sleep(delay).await;
            }

            match self.try_fetch(url).await {
                Ok((data, content_type)) => {
                    debug!(
                        url = %url,
                        size = data.len(),
                        content_type = %content_type,
                        attempt,
                        "Fetched document"
                    );
                    return Ok((data, content_type));
                }
                Err(message) => {
                    warn!(url = %url, attempt, error = %message, "Fetch attempt failed");
                    last_error = message;
                }
            }
        }

        Err(PdfProxyError::Fetch(last_error))
    }

    /// A single GET attempt
    async fn try_fetch(&self, url: &str) -> FlightResult {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("upstream returned status {}", response.status()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let data = response.bytes().await.map_err(|e| e.to_string())?.to_vec();

        Ok((data, content_type))
    }

    /// Fetch with request coalescing: concurrent calls for the same URL share
    /// one underlying retry sequence
    ///
    /// The first caller for a URL becomes the owner and fetches; later callers
    /// subscribe to its result. If the owner's task is dropped mid-flight, the
    /// waiters fall back to fetching on their own.
    pub async fn fetch_coalesced(&self, url: &str) -> Result<(Vec<u8>, String)> {
        let rx = {
            let mut flights = self.lock_flights();
            match flights.get(url) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    flights.insert(url.to_string(), tx);
                    None
                }
            }
        };

        if let Some(mut rx) = rx {
            debug!(url = %url, "Joining in-flight fetch");
            return match rx.recv().await {
                Ok(Ok((data, content_type))) => Ok((data, content_type)),
                Ok(Err(message)) => Err(PdfProxyError::Fetch(message)),
                Err(_) => self.fetch(url).await,
            };
        }

        let guard = FlightGuard {
            fetcher: self,
            url,
            finished: false,
        };

        let result = self.fetch(url).await;

        let outcome = match &result {
            Ok((data, content_type)) => Ok((data.clone(), content_type.clone())),
            Err(err) => Err(err.message()),
        };
        guard.finish(outcome);

        result
    }

    fn lock_flights(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<FlightResult>>> {
        self.flights.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PdfFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight map entry if the owning fetch never completes, so a
/// dropped owner cannot wedge the key for later requests
struct FlightGuard<'a> {
    fetcher: &'a PdfFetcher,
    url: &'a str,
    finished: bool,
}

impl FlightGuard<'_> {
    /// Publish the outcome to any waiters and retire the flight
    fn finish(mut self, outcome: FlightResult) {
        self.finished = true;
        let tx = self.fetcher.lock_flights().remove(self.url);
        if let Some(tx) = tx {
            // No waiters is fine; the send result is irrelevant
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.fetcher.lock_flights().remove(self.url);
        }
    }
}
