//! Status and health check handlers for the webhook gateway.
//!
//! This module provides HTTP endpoints for monitoring gateway health:
//! - `/health` - Simple health check for systemd/load balancers
//! - `/ready` - Readiness probe
//! - `/status` - Delivery counters and runtime metrics
//! - `/metrics` - Prometheus text format
//!
//! # Architecture
//!
//! ```text
//! HTTP Request ──> Axum Router ──> status_handler ──> AppState
//!                                        │                │
//!                                        ▼                ▼
//!                              StatusResponse    LatencyHistogram
//!                                        │         + Metrics
//!                                        ▼         + IdempotencyGuard
//!                                   JSON Response
//! ```
//!
//! # Example Response
//!
//! ```json
//! {
//!   "version": "0.1.0",
//!   "name": "hr-webhooks",
//!   "uptime_seconds": 3600,
//!   "deliveries_received": 1024,
//!   "processor_invocations": 980,
//!   "duplicates_suppressed": 40,
//!   "error_count": 4,
//!   "idempotency_records": 980,
//!   "memory": { "rss_bytes": 52428800, "virtual_bytes": 268435456 },
//!   "latency": { "p50_ms": 1.2, "p95_ms": 4.5, "p99_ms": 9.8, ... },
//!   "status": "running",
//!   "timestamp": "2026-01-01T12:00:00+00:00"
//! }
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument, warn};

use crate::metrics::Metrics;
use crate::webhooks::{IdempotencyGuard, Outcome};

/// Server version from Cargo.toml
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name from Cargo.toml
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

// ============================================================================
// Response Types
// ============================================================================

/// Health check response for simple liveness probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status (always "healthy" if responding)
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// Detailed gateway status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server version (from Cargo.toml)
    pub version: String,

    /// Server name
    pub name: String,

    /// Server uptime in seconds
    pub uptime_seconds: u64,

    /// Deliveries that reached the webhook pipeline
    pub deliveries_received: u64,

    /// Times a processor was invoked
    pub processor_invocations: u64,

    /// Deliveries suppressed as duplicates
    pub duplicates_suppressed: u64,

    /// Deliveries that ended in an error outcome
    pub error_count: u64,

    /// Records held by the idempotency store
    pub idempotency_records: u64,

    /// Memory usage metrics
    pub memory: MemoryMetrics,

    /// Delivery latency statistics (percentiles)
    pub latency: LatencyMetrics,

    /// Server status (always "running" if responding)
    pub status: String,

    /// RFC 3339 timestamp of when status was generated
    pub timestamp: String,
}

/// Memory usage metrics collected from sysinfo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident Set Size - actual physical memory used (bytes)
    pub rss_bytes: u64,

    /// Virtual memory size (bytes)
    pub virtual_bytes: u64,
}

/// Request latency percentile metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// 50th percentile (median) latency in milliseconds
    pub p50_ms: f64,

    /// 95th percentile latency in milliseconds
    pub p95_ms: f64,

    /// 99th percentile latency in milliseconds
    pub p99_ms: f64,

    /// Total number of deliveries recorded
    pub total_requests: u64,

    /// Mean latency in milliseconds
    pub mean_ms: f64,

    /// Maximum latency recorded in milliseconds
    pub max_ms: f64,
}

// ============================================================================
// Latency Histogram
// ============================================================================

/// Thread-safe latency histogram for delivery timings.
///
/// Tracks latencies from 1 microsecond to 60 seconds with 3 significant
/// figures of precision.
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: RwLock<Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create a new latency histogram.
    pub fn new() -> Self {
        // Constant bounds; construction cannot fail
        let histogram =
            Histogram::new_with_bounds(1, 60_000_000, 3).expect("Failed to create histogram");
        Self {
            inner: RwLock::new(histogram),
        }
    }

    /// Record a latency value in microseconds.
    ///
    /// Values outside the histogram bounds are silently ignored.
    pub fn record(&self, latency_us: u64) {
        let mut hist = self.inner.write();
        let _ = hist.record(latency_us);
    }

    /// Record a latency duration.
    pub fn record_duration(&self, duration: std::time::Duration) {
        self.record(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX));
    }

    /// Get the total count of recorded values.
    pub fn count(&self) -> u64 {
        self.inner.read().len()
    }

    /// Get complete latency metrics in milliseconds.
    pub fn metrics(&self) -> LatencyMetrics {
        let hist = self.inner.read();
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

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Shared state for status tracking.
///
/// # Thread Safety
///
/// - `start_time`: Immutable after creation
/// - `metrics`: Atomic totals plus `RwLock`ed breakdowns
/// - `latency_histogram`: `RwLock`-wrapped for efficient reads
///
/// # Usage
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use hr_webhooks::handlers::AppState;
/// use hr_webhooks::webhooks::Outcome;
///
/// let state = Arc::new(AppState::new());
/// state.record_delivery("keka", 200, Outcome::Success, Duration::from_millis(3));
/// ```
#[derive(Debug)]
pub struct AppState {
    start_time: Instant,
    latency_histogram: LatencyHistogram,
    metrics: Metrics,
    idempotency: Option<IdempotencyGuard>,
}

impl AppState {
    /// Create a new AppState with zeroed counters.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            latency_histogram: LatencyHistogram::new(),
            metrics: Metrics::new(),
            idempotency: None,
        }
    }

    /// Attach the idempotency guard so `/status` can report its size.
    pub fn with_idempotency(mut self, guard: IdempotencyGuard) -> Self {
        self.idempotency = Some(guard);
        self
    }

    /// Get the server uptime in seconds.
    #[inline]
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Delivery metrics.
    #[inline]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Record a finished delivery.
    pub fn record_delivery(
        &self,
        provider: &str,
        status_code: u16,
        outcome: Outcome,
        duration: std::time::Duration,
    ) {
        self.metrics.record_delivery(provider, status_code, outcome);
        self.latency_histogram.record_duration(duration);
    }

    /// Record a processor invocation.
    #[inline]
    pub fn record_processor_invocation(&self) {
        self.metrics.record_processor_invocation();
    }

    /// Deliveries received so far.
    #[inline]
    pub fn deliveries_received(&self) -> u64 {
        self.metrics.deliveries_total.load(Ordering::Relaxed)
    }

    /// Processor invocations so far.
    #[inline]
    pub fn processor_invocations(&self) -> u64 {
        self.metrics.processor_invocations_total.load(Ordering::Relaxed)
    }

    /// Duplicates suppressed so far.
    #[inline]
    pub fn duplicates_suppressed(&self) -> u64 {
        self.metrics.duplicates_total.load(Ordering::Relaxed)
    }

    /// Error outcomes so far.
    #[inline]
    pub fn error_count(&self) -> u64 {
        self.metrics.errors_total.load(Ordering::Relaxed)
    }

    /// Get the latency metrics.
    #[inline]
    pub fn latency_metrics(&self) -> LatencyMetrics {
        self.latency_histogram.metrics()
    }

    /// Records held by the idempotency store, or 0 if unavailable.
    pub async fn idempotency_records(&self) -> u64 {
        let Some(guard) = &self.idempotency else {
            return 0;
        };
        match guard.len().await {
            Ok(len) => len as u64,
            Err(e) => {
                warn!(error = %e, "Could not read idempotency store size");
                0
            }
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// System Metrics Collection
// ============================================================================

/// Collect memory metrics for the current process using sysinfo.
///
/// Returns zeros if the process cannot be found.
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

/// Health check endpoint handler.
///
/// # Route
/// `GET /health`
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy"}
/// ```
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    debug!("Health check requested");
    (StatusCode::OK, Json(HealthResponse::default()))
}

/// Detailed status endpoint handler.
///
/// # Route
/// `GET /status`
#[instrument(skip_all)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Status check requested");

    let response = StatusResponse {
        version: SERVER_VERSION.to_string(),
        name: SERVER_NAME.to_string(),
        uptime_seconds: state.uptime_seconds(),
        deliveries_received: state.deliveries_received(),
        processor_invocations: state.processor_invocations(),
        duplicates_suppressed: state.duplicates_suppressed(),
        error_count: state.error_count(),
        idempotency_records: state.idempotency_records().await,
        memory: collect_memory_metrics(),
        latency: state.latency_metrics(),
        status: "running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness check endpoint handler.
///
/// # Route
/// `GET /ready`
#[instrument(skip_all)]
pub async fn readiness_handler() -> impl IntoResponse {
    debug!("Readiness check requested");
    (StatusCode::OK, Json(HealthResponse::default()))
}

/// Prometheus scrape endpoint.
///
/// # Route
/// `GET /metrics`
#[instrument(skip_all)]
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics().to_prometheus_format(),
    )
}

// ============================================================================
// Router Setup
// ============================================================================

/// Create the status router with all health and status endpoints.
///
/// # Routes
/// - `GET /health` - Simple health check
/// - `GET /ready` - Readiness probe
/// - `GET /status` - Detailed status with metrics
/// - `GET /metrics` - Prometheus text
pub fn status_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================
