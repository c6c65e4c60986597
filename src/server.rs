//! HTTP server for the PDF proxy endpoints
//!
//! Provides /health and /proxy-pdf?url=<absolute URL>.

use crate::cache::PdfCache;
use crate::fetch::PdfFetcher;
use crate::types::{CacheEntry, HealthResponse};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use url::Url;

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: PdfCache,
    pub fetcher: PdfFetcher,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: PdfCache, fetcher: PdfFetcher) -> Self {
        Self {
            cache,
            fetcher,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

/// Proxy query parameters
#[derive(Deserialize)]
pub struct ProxyQuery {
    #[serde(default)]
    url: Option<String>,
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/proxy-pdf", get(proxy_pdf))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.cache.stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: cache_stats,
    })
}

/// Proxy a PDF from its source URL, serving from cache when fresh
async fn proxy_pdf(
    State(state): State<SharedState>,
    Query(params): Query<ProxyQuery>,
) -> Response {
    let url = match params.url {
        Some(url) if !url.is_empty() => url,
        _ => return error_response(StatusCode::BAD_REQUEST, "PDF URL is required", None),
    };

    if Url::parse(&url).is_err() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid PDF URL format", None);
    }

    if let Some(entry) = state.cache.get(&url).await {
        return pdf_response(entry.data, &entry.content_type, true);
    }

    match state.fetcher.fetch_coalesced(&url).await {
        Ok((data, content_type)) => {
            state
                .cache
                .put(&url, CacheEntry::new(data.clone(), content_type.clone()))
                .await;
            pdf_response(data, &content_type, false)
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Failed to proxy PDF");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Failed to proxy PDF: {}", e.message()),
                Some(url),
            )
        }
    }
}

/// Build the binary response with its fixed security header set
fn pdf_response(data: Vec<u8>, content_type: &str, from_cache: bool) -> Response {
    let cache_header = if from_cache { "HIT" } else { "MISS" };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            "inline; filename=\"protected.pdf\"",
        )
        .header(
            header::CONTENT_SECURITY_POLICY,
            "default-src 'none'; script-src 'none'; object-src 'none';",
        )
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header(header::X_FRAME_OPTIONS, "SAMEORIGIN")
        .header("X-Download-Options", "noopen")
        .header(header::CACHE_CONTROL, "public, max-age=300")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "GET")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
        .header("X-Cache", cache_header)
        .body(Body::from(data))
        .unwrap()
}

fn error_response(status: StatusCode, message: &str, url: Option<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            url,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn create_test_state(fetcher: PdfFetcher) -> SharedState {
        let cache = PdfCache::new(50, 10, 300);
        Arc::new(ServerState::new(cache, fetcher))
    }

    fn fast_fetcher() -> PdfFetcher {
        PdfFetcher::with_options(Duration::from_secs(5), 1)
    }

    /// Bind a throwaway upstream on an ephemeral port, counting hits
    async fn spawn_upstream(hits: Arc<AtomicUsize>, status: StatusCode) -> String {
        let router = Router::new().route(
            "/chapter.pdf",
            get(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    if status.is_success() {
                        Response::builder()
                            .status(StatusCode::OK)
                            .header(header::CONTENT_TYPE, "application/pdf")
                            .body(Body::from(&b"%PDF-1.7 chapter"[..]))
                            .unwrap()
                    } else {
                        Response::builder().status(status).body(Body::empty()).unwrap()
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(create_test_state(fast_fetcher()));

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].as_u64().is_some());
        assert!(json["cache"]["entries"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_missing_url_returns_400() {
        let router = create_router(create_test_state(fast_fetcher()));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/proxy-pdf")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "PDF URL is required");
        assert!(json.get("url").is_none());
    }

    #[tokio::test]
    async fn test_empty_url_returns_400() {
        let router = create_router(create_test_state(fast_fetcher()));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/proxy-pdf?url=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "PDF URL is required");
    }

    #[tokio::test]
    async fn test_invalid_url_returns_400() {
        let router = create_router(create_test_state(fast_fetcher()));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/proxy-pdf?url=not-a-url")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid PDF URL format");
    }

    #[tokio::test]
    async fn test_proxy_success_carries_security_headers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_upstream(hits.clone(), StatusCode::OK).await;
        let router = create_router(create_test_state(fast_fetcher()));

        let uri = format!("/proxy-pdf?url={}/chapter.pdf", base);
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "inline; filename=\"protected.pdf\""
        );
        assert_eq!(
            headers[header::CONTENT_SECURITY_POLICY],
            "default-src 'none'; script-src 'none'; object-src 'none';"
        );
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_FRAME_OPTIONS], "SAMEORIGIN");
        assert_eq!(headers["x-download-options"], "noopen");
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=300");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
        assert_eq!(headers["x-cache"], "MISS");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"%PDF-1.7 chapter");
    }

    #[tokio::test]
    async fn test_second_request_served_from_cache() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_upstream(hits.clone(), StatusCode::OK).await;
        let router = create_router(create_test_state(fast_fetcher()));

        let uri = format!("/proxy-pdf?url={}/chapter.pdf", base);

        let first = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri.clone())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.headers()["x-cache"], "MISS");

        let second = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()["x-cache"], "HIT");

        // The upstream was only consulted once
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let body = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"%PDF-1.7 chapter");
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_500_with_url() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_upstream(hits.clone(), StatusCode::INTERNAL_SERVER_ERROR).await;
        let router = create_router(create_test_state(fast_fetcher()));

        let url = format!("{}/chapter.pdf", base);
        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/proxy-pdf?url={}", url))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        let error = json["error"].as_str().unwrap();
        assert!(error.starts_with("Failed to proxy PDF:"));
        assert!(error.contains("500"));
        assert_eq!(json["url"], url);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_upstream(hits.clone(), StatusCode::INTERNAL_SERVER_ERROR).await;
        let state = create_test_state(fast_fetcher());
        let router = create_router(state.clone());

        let uri = format!("/proxy-pdf?url={}/chapter.pdf", base);
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.cache.len().await, 0);
    }

    #[test]
    fn test_server_state_new() {
        let cache = PdfCache::new(50, 10, 300);
        let state = ServerState::new(cache, fast_fetcher());

        // started_at should be close to now
        let diff = (Utc::now() - state.started_at).num_seconds();
        assert!((0..5).contains(&diff));
    }
}
