//! Operational metrics with Prometheus
//!
//! Exposes the metrics that matter for this service: edge write rates,
//! store latency, ingestion outcomes and breaker behavior.
//!
//! NOTE: No member ids in metric labels to prevent high-cardinality
//! explosion.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Request Metrics
    // ============================================================================

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "setu_http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "endpoint", "status"]
    ).unwrap();

    /// Total HTTP requests
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("setu_http_requests_total", "Total HTTP requests"),
        &["method", "endpoint", "status"]
    ).unwrap();

    // ============================================================================
    // Edge Graph Metrics
    // ============================================================================

    /// Edge upserts by result
    pub static ref EDGE_UPSERTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("setu_edge_upserts_total", "Total edge upsert transactions"),
        &["result"]
    ).unwrap();

    /// Messages appended to edges
    pub static ref EDGE_MESSAGES_TOTAL: IntCounter = IntCounter::new(
        "setu_edge_messages_total",
        "Total messages appended to edges"
    ).unwrap();

    /// Connection listings by query mode ("partition" or "index")
    pub static ref CONNECTION_QUERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("setu_connection_queries_total", "Total connection listings"),
        &["mode"]
    ).unwrap();

    // ============================================================================
    // Store Metrics
    // ============================================================================

    /// Store operations by kind and result
    pub static ref STORE_OPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("setu_store_ops_total", "Total store operations"),
        &["operation", "result"]
    ).unwrap();

    /// Store operation duration
    pub static ref STORE_OP_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "setu_store_op_duration_seconds",
            "Store operation duration"
        )
        .buckets(vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1]),
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Ingestion Metrics
    // ============================================================================

    /// Ingestion outcomes ("uploaded", "indexed", "pending", "failed")
    pub static ref INGESTION_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("setu_ingestion_total", "Total profile ingestions by outcome"),
        &["result"]
    ).unwrap();

    /// Upload retries after a failed attempt
    pub static ref INGESTION_RETRIES_TOTAL: IntCounter = IntCounter::new(
        "setu_ingestion_retries_total",
        "Total upload retry attempts"
    ).unwrap();

    // ============================================================================
    // Circuit Breaker Metrics
    // ============================================================================

    /// Calls rejected because a circuit was open
    pub static ref BREAKER_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("setu_breaker_rejections_total", "Calls rejected by an open circuit"),
        &["service"]
    ).unwrap();

    /// Breaker state transitions
    pub static ref BREAKER_TRANSITIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("setu_breaker_transitions_total", "Circuit breaker state transitions"),
        &["service", "state"]
    ).unwrap();

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Errors surfaced to clients, by error code
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("setu_errors_total", "Total errors by type"),
        &["error_type"]
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(EDGE_UPSERTS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(EDGE_MESSAGES_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(CONNECTION_QUERIES_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(STORE_OPS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(STORE_OP_DURATION.clone()))?;

    METRICS_REGISTRY.register(Box::new(INGESTION_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(INGESTION_RETRIES_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(BREAKER_REJECTIONS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(BREAKER_TRANSITIONS_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(ERRORS_TOTAL.clone()))?;

    Ok(())
}

/// Helper to time operations with a histogram (RAII pattern)
/// Usage: let _timer = Timer::new(SOME_HISTOGRAM.with_label_values(&["op"]));
pub struct Timer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl Timer {
    /// Create timer that records duration to histogram on drop
    pub fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
