//! Prometheus metrics
//!
//! Process-wide counters for remote traffic, cache effectiveness and
//! pipeline outcomes.

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, CounterVec, Encoder, Gauge, TextEncoder};

lazy_static! {
    /// Counter: remote requests by endpoint and outcome
    pub static ref REMOTE_REQUESTS: CounterVec = register_counter_vec!(
        "followgraph_remote_requests_total",
        "Remote API requests by endpoint and outcome",
        &["endpoint", "outcome"]
    )
    .expect("Failed to create remote_requests metric");

    /// Counter: cache operations (hit/miss/write_error)
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec!(
        "followgraph_cache_operations_total",
        "Common-followings cache operations by type",
        &["operation"]
    )
    .expect("Failed to create cache_operations metric");

    /// Counter: per-user relation lookups by outcome
    pub static ref RELATION_LOOKUPS: CounterVec = register_counter_vec!(
        "followgraph_relation_lookups_total",
        "Per-user common-followings lookups by outcome",
        &["outcome"]
    )
    .expect("Failed to create relation_lookups metric");

    /// Counter: pipeline runs by final status
    pub static ref PIPELINE_RUNS: CounterVec = register_counter_vec!(
        "followgraph_pipeline_runs_total",
        "Pipeline runs by final status",
        &["status"]
    )
    .expect("Failed to create pipeline_runs metric");

    /// Gauge: 1 while a pipeline run is paused
    pub static ref PIPELINE_PAUSED: Gauge = register_gauge!(
        "followgraph_pipeline_paused",
        "1 while the active pipeline run is paused"
    )
    .expect("Failed to create pipeline_paused metric");
}

/// Record the outcome of one remote request
pub fn record_request(endpoint: &str, ok: bool) {
    REMOTE_REQUESTS
        .with_label_values(&[endpoint, if ok { "ok" } else { "error" }])
        .inc();
}

/// Record cache hit
pub fn record_cache_hit() {
    CACHE_OPERATIONS.with_label_values(&["hit"]).inc();
}

/// Record cache miss
pub fn record_cache_miss() {
    CACHE_OPERATIONS.with_label_values(&["miss"]).inc();
}

/// Record a failed cache write
pub fn record_cache_write_error() {
    CACHE_OPERATIONS.with_label_values(&["write_error"]).inc();
}

/// Record a per-user lookup (`network`, `cache` or `failed`)
pub fn record_lookup(outcome: &str) {
    RELATION_LOOKUPS.with_label_values(&[outcome]).inc();
}

/// Record a finished run
pub fn record_run(status: &str) {
    PIPELINE_RUNS.with_label_values(&[status]).inc();
}

pub fn set_paused(paused: bool) {
    PIPELINE_PAUSED.set(if paused { 1.0 } else { 0.0 });
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        record_request("followings", true);
        record_request("followings", false);
        record_cache_hit();
        record_cache_miss();
        record_cache_write_error();
        record_lookup("network");
        record_run("done");
        set_paused(false);
    }

    #[test]
    fn test_encode_metrics() {
        record_cache_hit();
        let output = encode_metrics();
        assert!(output.contains("followgraph_cache_operations_total"));
    }
}
