//! Metrics definitions for the conference coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `conf_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `outcome`: join outcomes (joined, waiting, plus one per error code)
//! - `audience`: relay audiences (6 values)
//! - `reason`: drop reasons (full, closed, disconnected)
//! - `kind`: signal kinds (offer, answer, ice)
//! - `operation`: repository and service operations (~40 values)
//! - `endpoint`: route templates, identifiers replaced by placeholders

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Redis latency buckets - internal service call
        .set_buckets_for_metric(
            Matcher::Prefix("conf_redis".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set Redis latency buckets: {e}"))?
        // Operation buckets include bcrypt verification on join
        .set_buckets_for_metric(
            Matcher::Prefix("conf_operation".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set operation duration buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("conf_http_request_duration_seconds".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000],
        )
        .map_err(|e| format!("Failed to set HTTP duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Conference Metrics
// ============================================================================

/// Set the number of conferences held in the session store.
///
/// Metric: `conf_conferences_active`
pub fn set_conferences_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("conf_conferences_active").set(count as f64);
}

/// Record a join attempt outcome.
///
/// Metric: `conf_joins_total`
/// Labels: `outcome` (joined, waiting, or a lowercase error code)
pub fn record_join(outcome: &'static str) {
    counter!("conf_joins_total", "outcome" => outcome).increment(1);
}

/// Record a screen share forcibly ended by another participant's start.
///
/// Metric: `conf_screen_share_preemptions_total`
pub fn record_screen_share_preemption() {
    counter!("conf_screen_share_preemptions_total").increment(1);
}

/// Record duration of a coordinator operation.
///
/// Metric: `conf_operation_duration_seconds`
/// Labels: `operation`
pub fn record_operation_duration(operation: &'static str, duration: Duration) {
    histogram!("conf_operation_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metrics: `conf_http_request_duration_seconds`, `conf_http_requests_total`
/// Labels: `method`, `endpoint`, `status`
///
/// Recorded by `http_metrics_middleware` for every response, including
/// rejections produced before a handler runs.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("conf_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("conf_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        100..=399 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Replace identifier segments with placeholders to bound cardinality.
///
/// UUIDs become `{id}`, the segment after `peers` becomes `{peer_id}` and
/// numeric segments become `{n}`. Paths outside the API collapse to
/// `/other`.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" => return path.to_string(),
        _ => {}
    }
    if !path.starts_with("/api/v1/") {
        return "/other".to_string();
    }

    let mut normalized = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        let replaced = if previous == "peers" {
            "{peer_id}"
        } else if uuid::Uuid::parse_str(segment).is_ok() {
            "{id}"
        } else if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            "{n}"
        } else {
            segment
        };
        normalized.push(replaced);
        previous = segment;
    }
    normalized.join("/")
}

/// Set the number of open peer event streams.
///
/// Metric: `conf_peer_streams_active`
pub fn set_peer_streams_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("conf_peer_streams_active").set(count as f64);
}

// ============================================================================
// Relay Metrics
// ============================================================================

/// Record an event handed to a peer channel.
///
/// Metric: `conf_relay_events_total`
/// Labels: `audience`
pub fn record_relay_event(audience: &'static str) {
    counter!("conf_relay_events_total", "audience" => audience).increment(1);
}

/// Record an event that could not be delivered.
///
/// Metric: `conf_relay_events_dropped_total`
/// Labels: `reason` (full, closed, disconnected)
pub fn record_relay_dropped(reason: &'static str) {
    counter!("conf_relay_events_dropped_total", "reason" => reason).increment(1);
}

/// Record a relayed signaling message.
///
/// Metric: `conf_signals_total`
/// Labels: `kind` (offer, answer, ice)
pub fn record_signal(kind: &'static str) {
    counter!("conf_signals_total", "kind" => kind).increment(1);
}

// ============================================================================
// Persistence Metrics
// ============================================================================

/// Record a failed write-behind persistence call.
///
/// Metric: `conf_persistence_failures_total`
/// Labels: `operation`
pub fn record_persistence_failure(operation: &'static str) {
    counter!("conf_persistence_failures_total", "operation" => operation).increment(1);
}

/// Record Redis operation latency.
///
/// Metric: `conf_redis_latency_seconds`
/// Labels: `operation`
pub fn record_redis_latency(operation: &'static str, duration: Duration) {
    histogram!("conf_redis_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}
