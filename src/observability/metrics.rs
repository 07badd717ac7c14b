//! Metrics collection and exposition.
//!
//! # Metrics
//! - `query_cache_lookups_total` (counter): lookups by result (fresh, stale, miss, expired)
//! - `query_cache_entries` (gauge): current entry count
//! - `query_cache_evictions_total` (counter): capacity evictions
//! - `query_dedup_joins_total` (counter): callers attached to an in-flight operation
//! - `query_retries_total` (counter): retry attempts
//! - `circuit_calls_total` (counter): attempts by circuit and outcome
//! - `circuit_call_duration_seconds` (histogram): attempt latency by circuit
//! - `circuit_transitions_total` (counter): transitions by circuit and target phase
//! - `circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `circuit_fallbacks_total` (counter): fallback resolutions by circuit and source
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_lookup(result: &'static str) {
    metrics::counter!("query_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    metrics::gauge!("query_cache_entries").set(entries as f64);
}

pub fn record_cache_eviction() {
    metrics::counter!("query_cache_evictions_total").increment(1);
}

pub fn record_dedup_join() {
    metrics::counter!("query_dedup_joins_total").increment(1);
}

pub fn record_retry(attempt: u32) {
    metrics::counter!("query_retries_total", "attempt" => attempt.to_string()).increment(1);
}

pub fn record_circuit_call(circuit: &str, outcome: &'static str, duration: Duration) {
    metrics::counter!("circuit_calls_total", "circuit" => circuit.to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!("circuit_call_duration_seconds", "circuit" => circuit.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_circuit_rejected(circuit: &str) {
    metrics::counter!("circuit_calls_total", "circuit" => circuit.to_string(), "outcome" => "rejected")
        .increment(1);
}

pub fn record_circuit_transition(circuit: &str, to: &'static str, gauge_value: f64) {
    metrics::counter!("circuit_transitions_total", "circuit" => circuit.to_string(), "to" => to)
        .increment(1);
    metrics::gauge!("circuit_state", "circuit" => circuit.to_string()).set(gauge_value);
}

pub fn record_fallback(circuit: &str, source: &'static str) {
    metrics::counter!("circuit_fallbacks_total", "circuit" => circuit.to_string(), "source" => source)
        .increment(1);
}
