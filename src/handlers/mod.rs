//! HTTP handlers outside the cached read path and the webhook pipeline.

pub mod ops;
pub mod status;

pub use ops::{ops_router, VersionBody};
pub use status::{
    health_handler, metrics_handler, readiness_handler, status_handler, status_router,
    HealthResponse, LatencyHistogram, LatencyMetrics, MemoryMetrics, StatusResponse,
};
