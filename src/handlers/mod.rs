//! HTTP handlers for gateway health, status and metrics.

pub mod status;

pub use status::{
    health_handler, metrics_handler, readiness_handler, status_handler, status_router, AppState,
    HealthResponse, LatencyHistogram, LatencyMetrics, MemoryMetrics, StatusResponse,
};
