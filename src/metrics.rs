//! Metrics and telemetry for the rollup engine
//!
//! Prometheus metrics covering rollup builds, rebuild pipeline units and query
//! planning. Everything is registered in the default registry; [`gather_metrics`]
//! renders the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter_vec, Encoder,
    Gauge, Histogram, HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    // === Rollup Builder ===

    /// Rollup rows written
    pub static ref RECORDS_WRITTEN: IntCounterVec = register_int_counter_vec!(
        "rollup_records_written_total",
        "Rollup rows upserted",
        &["granularity", "shape"]
    ).unwrap();

    /// Dimension keys skipped because their rows could not be folded
    pub static ref KEYS_SKIPPED: IntCounterVec = register_int_counter_vec!(
        "rollup_keys_skipped_total",
        "Dimension keys skipped during a build",
        &["granularity", "shape"]
    ).unwrap();

    /// Build duration per period
    pub static ref BUILD_DURATION: HistogramVec = register_histogram_vec!(
        "rollup_build_duration_seconds",
        "Single-period build latency in seconds",
        &["granularity"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // === Pipeline Orchestrator ===

    /// Pipeline units by stage and outcome
    pub static ref PIPELINE_UNITS: IntCounterVec = register_int_counter_vec!(
        "rollup_pipeline_units_total",
        "Pipeline units finished",
        &["stage", "outcome"]
    ).unwrap();

    /// Unit attempt duration
    pub static ref UNIT_DURATION: HistogramVec = register_histogram_vec!(
        "rollup_pipeline_unit_duration_seconds",
        "Pipeline unit latency in seconds",
        &["stage"],
        vec![0.01, 0.1, 1.0, 10.0, 60.0, 600.0]
    ).unwrap();

    /// Rebuild runs reaching a terminal state
    pub static ref PIPELINE_RUNS: IntCounterVec = register_int_counter_vec!(
        "rollup_pipeline_runs_total",
        "Rebuild runs by terminal state",
        &["state"]
    ).unwrap();

    /// Runs currently in flight
    pub static ref ACTIVE_RUNS: Gauge = register_gauge!(
        "rollup_pipeline_active_runs",
        "Rebuild runs queued or processing"
    ).unwrap();

    // === Query Planner ===

    /// Queries by strategy
    pub static ref PLANNER_QUERIES: IntCounterVec = register_int_counter_vec!(
        "rollup_planner_queries_total",
        "Range queries by chosen strategy",
        &["strategy"]
    ).unwrap();

    /// Plan operations by sign and granularity
    pub static ref PLANNER_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "rollup_planner_operations_total",
        "Executed plan operations",
        &["sign", "granularity"]
    ).unwrap();

    /// End-to-end query latency
    pub static ref QUERY_DURATION: Histogram = register_histogram!(
        "rollup_query_duration_seconds",
        "Range query latency in seconds",
        vec![0.0005, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record the outcome of one period build
#[inline]
pub fn record_build(granularity: &str, shape: &str, written: usize, skipped: usize) {
    RECORDS_WRITTEN
        .with_label_values(&[granularity, shape])
        .inc_by(written as u64);
    if skipped > 0 {
        KEYS_SKIPPED
            .with_label_values(&[granularity, shape])
            .inc_by(skipped as u64);
    }
}

/// Record build latency
#[inline]
pub fn record_build_duration(granularity: &str, duration_secs: f64) {
    BUILD_DURATION
        .with_label_values(&[granularity])
        .observe(duration_secs);
}

/// Record a finished pipeline unit
#[inline]
pub fn record_unit(stage: &str, duration_secs: f64, success: bool) {
    let outcome = if success { "success" } else { "failed" };
    PIPELINE_UNITS.with_label_values(&[stage, outcome]).inc();
    UNIT_DURATION.with_label_values(&[stage]).observe(duration_secs);
}

/// Record a unit retry
#[inline]
pub fn record_unit_retry(stage: &str) {
    PIPELINE_UNITS.with_label_values(&[stage, "retried"]).inc();
}

/// Record a run being queued
#[inline]
pub fn record_run_started() {
    ACTIVE_RUNS.inc();
}

/// Record a run reaching a terminal state
#[inline]
pub fn record_run_finished(state: &str) {
    ACTIVE_RUNS.dec();
    PIPELINE_RUNS.with_label_values(&[state]).inc();
}

/// Record an executed query
#[inline]
pub fn record_query(strategy: &str, duration_secs: f64) {
    PLANNER_QUERIES.with_label_values(&[strategy]).inc();
    QUERY_DURATION.observe(duration_secs);
}

/// Record one executed plan operation
#[inline]
pub fn record_operation(sign: &str, granularity: &str) {
    PLANNER_OPERATIONS.with_label_values(&[sign, granularity]).inc();
}
