//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Mirror pipeline events onto the `metrics` facade
//! - Expose a Prometheus scrape endpoint when enabled
//!
//! # Metrics
//! - `fetch_requests_total` (counter): logical fetches by outcome
//! - `fetch_duration_seconds` (histogram): end-to-end latency
//! - `fetch_retry_attempts_total` (counter): network attempts by result
//! - `fetch_circuit_state` (gauge): 0=closed, 1=half-open, 2=open, per endpoint
//! - `fetch_circuit_rejections_total` (counter): calls refused by an open circuit
//! - `fetch_pool_active` / `fetch_pool_queued` (gauges)
//! - `fetch_dedup_total` (counter): coalesced, cache_hit, miss
//! - `fetch_deadline_total` (counter) and `fetch_deadline_duration_seconds` (histogram)
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op
//! - The in-process metric structs stay the source of truth for `metrics()`

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP listener.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_fetch(outcome: &'static str, duration: Duration) {
    metrics::counter!("fetch_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("fetch_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_retry_attempt(result: &'static str) {
    metrics::counter!("fetch_retry_attempts_total", "result" => result).increment(1);
}

pub fn record_circuit_state(endpoint: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!("fetch_circuit_state", "endpoint" => endpoint.to_string()).set(value);
}

pub fn record_circuit_rejection(endpoint: &str) {
    metrics::counter!("fetch_circuit_rejections_total", "endpoint" => endpoint.to_string())
        .increment(1);
}

pub fn record_pool(active: usize, queued: usize) {
    metrics::gauge!("fetch_pool_active").set(active as f64);
    metrics::gauge!("fetch_pool_queued").set(queued as f64);
}

pub fn record_dedup(outcome: &'static str) {
    metrics::counter!("fetch_dedup_total", "outcome" => outcome).increment(1);
}

pub fn record_deadline(timed_out: bool, elapsed: Duration) {
    let outcome = if timed_out { "timed_out" } else { "settled" };
    metrics::counter!("fetch_deadline_total", "outcome" => outcome).increment(1);
    metrics::histogram!("fetch_deadline_duration_seconds").record(elapsed.as_secs_f64());
}
