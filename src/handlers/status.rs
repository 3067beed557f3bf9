//! Status and health check handlers for booking-edge.
//!
//! - `/health` - Liveness, always 200 while the process serves requests
//! - `/ready` - Readiness, 503 when the key-value backend does not answer PING
//! - `/status` - Runtime metrics as JSON
//! - `/metrics` - Prometheus text export
//!
//! # Architecture
//!
//! ```text
//! HTTP Request ──> Axum Router ──> status_handler ──> AppContext
//!                                        │                │
//!                                        ▼                ▼
//!                              StatusResponse    LatencyHistogram
//!                                        │         + Metrics
//!                                        ▼
//!                                   JSON Response
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use hdrhistogram::{CreationError, Histogram};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument, warn};

use crate::app::AppContext;
use crate::metrics::MetricsSnapshot;

/// Server version from Cargo.toml
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name from Cargo.toml
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

// ============================================================================
// Response Types
// ============================================================================

/// Liveness and readiness body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy`, `ready` or `unavailable`
    pub status: String,

    /// Key-value backend name, on readiness checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Why the service is not ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthResponse {
    fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            backend: None,
            error: None,
        }
    }
}

/// Detailed server status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Server version (from Cargo.toml)
    pub version: String,

    /// Server name
    pub name: String,

    /// Server uptime in seconds
    pub uptime_seconds: u64,

    /// Key-value backend in use
    pub backend: String,

    /// Memory usage metrics
    pub memory: MemoryMetrics,

    /// Request latency statistics (percentiles)
    pub latency: LatencyMetrics,

    /// Cache and webhook counters
    pub counters: MetricsSnapshot,

    /// Server status (always "running" if responding)
    pub status: String,

    /// RFC 3339 timestamp of when status was generated
    pub timestamp: String,
}

/// Memory usage metrics collected from sysinfo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident Set Size (bytes)
    pub rss_bytes: u64,

    /// Virtual memory size (bytes)
    pub virtual_bytes: u64,
}

/// Request latency percentile metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// 50th percentile latency in milliseconds
    pub p50_ms: f64,

    /// 95th percentile latency in milliseconds
    pub p95_ms: f64,

    /// 99th percentile latency in milliseconds
    pub p99_ms: f64,

    /// Total number of requests recorded
    pub total_requests: u64,

    /// Mean latency in milliseconds
    pub mean_ms: f64,

    /// Maximum latency recorded in milliseconds
    pub max_ms: f64,
}

// ============================================================================
// Latency Histogram
// ============================================================================

/// Thread-safe request latency histogram.
///
/// Tracks 1 microsecond to 60 seconds with 3 significant figures.
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: RwLock<Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create an empty histogram.
    pub fn new() -> Result<Self, CreationError> {
        let histogram = Histogram::new_with_bounds(1, 60_000_000, 3)?;
        Ok(Self {
            inner: RwLock::new(histogram),
        })
    }

    /// Record a latency duration. Values outside the bounds are saturated.
    pub fn record_duration(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.inner.write().saturating_record(micros.max(1));
    }

    /// Number of recorded requests.
    pub fn count(&self) -> u64 {
        self.inner.read().len()
    }

    /// Percentiles converted to milliseconds.
    pub fn metrics(&self) -> LatencyMetrics {
        let hist = self.inner.read();
        if hist.is_empty() {
            return LatencyMetrics::default();
        }
        LatencyMetrics {
            p50_ms: hist.value_at_percentile(50.0) as f64 / 1000.0,
            p95_ms: hist.value_at_percentile(95.0) as f64 / 1000.0,
            p99_ms: hist.value_at_percentile(99.0) as f64 / 1000.0,
            total_requests: hist.len(),
            mean_ms: hist.mean() / 1000.0,
            max_ms: hist.max() as f64 / 1000.0,
        }
    }
}

// ============================================================================
// System Metrics Collection
// ============================================================================

/// Memory usage of the current process, zeroed if sysinfo cannot see it.
fn collect_memory_metrics() -> MemoryMetrics {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        Some(process) => MemoryMetrics {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        },
        None => {
            debug!("Could not find current process in sysinfo");
            MemoryMetrics::default()
        }
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// `GET /health`
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse::healthy()))
}

/// `GET /ready`
///
/// Ready means the key-value backend answered PING. Reads would still be
/// served without it (fail-open), but webhooks could not be persisted.
#[instrument(skip_all)]
pub async fn readiness_handler(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let backend = ctx.backend.backend_name().to_string();
    match ctx.backend.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ready".to_string(),
                backend: Some(backend),
                error: None,
            }),
        ),
        Err(e) => {
            warn!(backend = %backend, error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    backend: Some(backend),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// `GET /status`
#[instrument(skip_all)]
pub async fn status_handler(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let response = StatusResponse {
        version: SERVER_VERSION.to_string(),
        name: SERVER_NAME.to_string(),
        uptime_seconds: ctx.metrics.uptime().as_secs(),
        backend: ctx.backend.backend_name().to_string(),
        memory: collect_memory_metrics(),
        latency: ctx.latency.metrics(),
        counters: ctx.metrics.snapshot(),
        status: "running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

/// `GET /metrics`
#[instrument(skip_all)]
pub async fn metrics_handler(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        ctx.metrics.to_prometheus_format(),
    )
}

// ============================================================================
// Router Setup
// ============================================================================

/// Health, readiness, status and metrics routes.
pub fn status_router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::UnreachableBackend;
    use crate::cache::{InMemoryBackend, KvBackend};
    use crate::config::AppConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn router_with(backend: Arc<dyn KvBackend>) -> Router {
        let ctx = AppContext::for_tests(AppConfig::test_config(), backend).unwrap();
        status_router().with_state(Arc::new(ctx))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_latency_histogram() {
        let histogram = LatencyHistogram::new().unwrap();
        assert_eq!(histogram.metrics().total_requests, 0);
        for ms in [1, 2, 3, 4, 100] {
            histogram.record_duration(Duration::from_millis(ms));
        }
        let metrics = histogram.metrics();
        assert_eq!(metrics.total_requests, 5);
        assert!(metrics.p50_ms >= 2.9 && metrics.p50_ms <= 3.1);
        assert!(metrics.max_ms >= 99.0);
        assert_eq!(histogram.count(), 5);
    }

    #[tokio::test]
    async fn test_health() {
        let app = router_with(Arc::new(InMemoryBackend::new())).await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_reflects_backend() {
        let app = router_with(Arc::new(InMemoryBackend::new())).await;
        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let app = router_with(Arc::new(UnreachableBackend)).await;
        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "unavailable");
    }

    #[tokio::test]
    async fn test_status_and_metrics() {
        let app = router_with(Arc::new(InMemoryBackend::new())).await;
        let response = app
            .clone()
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["name"], SERVER_NAME);
        assert_eq!(body["backend"], "memory");
        assert_eq!(body["counters"]["cache_hits"], 0);

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&text).contains("booking_edge_uptime_seconds"));
    }
}
