/// Metrics for the identity cache responder
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Cache requests by type and outcome, with latencies
/// - Local store freshness decisions
/// - Negative cache hits and backend refreshes
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    // ========== Request Metrics ==========

    /// Cache requests by request type and terminal outcome
    pub static ref CACHE_REQ_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_req_total",
        "Total number of cache requests",
        &["type", "outcome"]
    )
    .unwrap();

    /// Cache request duration in seconds
    pub static ref CACHE_REQ_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cache_req_duration_seconds",
        "Cache request latencies in seconds",
        &["type"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Cache Metrics ==========

    /// Local store checks by freshness state
    pub static ref CACHE_REQ_STORE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_req_store_total",
        "Local store checks by freshness state",
        &["state"]
    )
    .unwrap();

    /// Domains skipped because of a negative cache entry
    pub static ref CACHE_REQ_NEGATIVE_HITS_TOTAL: IntCounter = register_int_counter!(
        "cache_req_negative_hits_total",
        "Total number of negative cache hits"
    )
    .unwrap();

    /// Negative cache size
    pub static ref NEGATIVE_CACHE_ENTRIES: IntGauge = register_int_gauge!(
        "negative_cache_entries",
        "Number of entries in the negative cache"
    )
    .unwrap();

    // ========== Backend Metrics ==========

    /// Backend calls by kind (refresh / enumerate) and status
    pub static ref CACHE_REQ_BACKEND_REFRESH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_req_backend_refresh_total",
        "Total number of backend refreshes",
        &["kind", "status"]
    )
    .unwrap();

    /// Requests that attached to a refresh already in flight
    pub static ref CACHE_REQ_INFLIGHT_JOINS_TOTAL: IntCounter = register_int_counter!(
        "cache_req_inflight_joins_total",
        "Total number of requests joining an in-flight refresh"
    )
    .unwrap();

    /// Optimisation level downgrades
    pub static ref CACHE_REQ_OPT_DOWNGRADES_TOTAL: IntCounter = register_int_counter!(
        "cache_req_opt_downgrades_total",
        "Total number of backend optimisation level downgrades"
    )
    .unwrap();

    /// Domains currently considered online
    pub static ref DOMAINS_ONLINE: IntGauge = register_int_gauge!(
        "domains_online",
        "Number of domains whose backend is reachable"
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    // ========== System Metrics ==========

    /// Application uptime in seconds
    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "uptime_seconds",
        "Application uptime in seconds"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a finished cache request
pub fn record_cache_request(req_type: &str, outcome: &str, duration: f64) {
    CACHE_REQ_TOTAL.with_label_values(&[req_type, outcome]).inc();
    CACHE_REQ_DURATION_SECONDS
        .with_label_values(&[req_type])
        .observe(duration);
}

/// Record a local store freshness decision
pub fn record_store_state(state: &str) {
    CACHE_REQ_STORE_TOTAL.with_label_values(&[state]).inc();
}

pub fn record_negative_hit() {
    CACHE_REQ_NEGATIVE_HITS_TOTAL.inc();
}

/// Record a backend call
pub fn record_backend_refresh(kind: &str, status: &str) {
    CACHE_REQ_BACKEND_REFRESH_TOTAL
        .with_label_values(&[kind, status])
        .inc();
}

pub fn record_inflight_join() {
    CACHE_REQ_INFLIGHT_JOINS_TOTAL.inc();
}

pub fn record_opt_downgrade() {
    CACHE_REQ_OPT_DOWNGRADES_TOTAL.inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
}
