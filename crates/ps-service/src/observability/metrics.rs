//! Metrics definitions for the presentation service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ps_` prefix for the presentation service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `operation`: bounded by code (book_slot, start_slot, …)
//! - `status`: success | error
//! - `outcome` / `error_type`: bounded by the `PsError` variant set

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle for serving
/// metrics from the embedding service.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the Prometheus recorder fails to install (e.g., already
/// installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // DB query buckets aligned with a 50ms p99 target
        .set_buckets_for_metric(
            Matcher::Prefix("ps_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        // Booking decisions complete in a handful of queries
        .set_buckets_for_metric(
            Matcher::Prefix("ps_booking".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("Failed to set booking buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Record a database query duration and outcome.
///
/// Metric: `ps_db_queries_total`, `ps_db_query_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("ps_db_query_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("ps_db_queries_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record the outcome of a booking attempt.
///
/// Metric: `ps_booking_decisions_total`
/// Labels: `outcome` (booked | conflict | invalid_transition | …)
pub fn record_booking_decision(outcome: &'static str, duration: Duration) {
    histogram!("ps_booking_decision_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());

    counter!("ps_booking_decisions_total", "outcome" => outcome).increment(1);
}

/// Record a completed (or refused) grading submission.
///
/// Metric: `ps_grading_submissions_total`
/// Labels: `status` (success | error), `error_type` when refused
pub fn record_grading(status: &'static str, error_type: Option<&'static str>) {
    counter!("ps_grading_submissions_total",
        "status" => status,
        "error_type" => error_type.unwrap_or("none")
    )
    .increment(1);
}

/// Record event lifecycle operations (create / update / delete).
///
/// Metric: `ps_event_operations_total`
/// Labels: `operation`, `status`
pub fn record_event_operation(operation: &'static str, status: &'static str) {
    counter!("ps_event_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}
