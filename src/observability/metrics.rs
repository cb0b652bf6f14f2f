//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): method, route, status
//! - `gateway_request_duration_seconds` (histogram): method, route
//! - `gateway_upstream_requests_total` (counter): service, outcome
//! - `gateway_upstream_duration_seconds` (histogram): service
//! - `gateway_circuit_transitions_total` (counter): service, from, to
//! - `gateway_circuit_state` (gauge): 0 closed, 1 half-open, 2 open
//! - `gateway_circuit_rejections_total` (counter): service
//! - `gateway_rate_limited_total` (counter): category
//! - `gateway_auth_failures_total` (counter): scheme, code
//! - `gateway_stream_bytes_total` / `gateway_stream_chunks_total` (counter): service
//!
//! # Design Decisions
//! - Labels are bounded: route is the upstream name or "local", never the raw path
//! - Histogram buckets tuned for API latencies up to LLM-scale responses

use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::resilience::CircuitState;

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Install the global Prometheus recorder.
///
/// Fails if a recorder is already installed in this process.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), DURATION_BUCKETS)?
        .install_recorder()?;
    tracing::info!("Prometheus recorder installed");
    Ok(handle)
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// `outcome` is "success", "failure" or "timeout".
pub fn record_upstream(service: &str, outcome: &'static str, start: Instant) {
    ::metrics::counter!(
        "gateway_upstream_requests_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("gateway_upstream_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_breaker_transition(service: &str, from: CircuitState, to: CircuitState) {
    ::metrics::counter!(
        "gateway_circuit_transitions_total",
        "service" => service.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
    ::metrics::gauge!("gateway_circuit_state", "service" => service.to_string()).set(to.as_gauge());
}

pub fn record_breaker_rejection(service: &str) {
    ::metrics::counter!("gateway_circuit_rejections_total", "service" => service.to_string()).increment(1);
}

pub fn record_rate_limited(category: &str) {
    ::metrics::counter!("gateway_rate_limited_total", "category" => category.to_string()).increment(1);
}

pub fn record_auth_failure(scheme: &'static str, code: &'static str) {
    ::metrics::counter!("gateway_auth_failures_total", "scheme" => scheme, "code" => code).increment(1);
}

pub fn record_stream_chunk(service: &str, bytes: usize) {
    ::metrics::counter!("gateway_stream_chunks_total", "service" => service.to_string()).increment(1);
    ::metrics::counter!("gateway_stream_bytes_total", "service" => service.to_string())
        .increment(bytes as u64);
}
