//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_accepted_total` (counter)
//! - `proxy_accept_errors_total` (counter)
//! - `proxy_transactions_total` (counter): by `outcome`
//! - `proxy_transaction_duration_seconds` (histogram): by `outcome`
//! - `proxy_transactions_in_flight` (gauge)
//! - `proxy_hook_failures_total` (counter): by `phase` (request, response)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accepted() {
    ::metrics::counter!("proxy_connections_accepted_total").increment(1);
}

pub fn record_accept_error() {
    ::metrics::counter!("proxy_accept_errors_total").increment(1);
}

/// Record a finished transaction under its outcome label.
pub fn record_transaction(outcome: &'static str, start: Instant) {
    ::metrics::counter!("proxy_transactions_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("proxy_transaction_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_in_flight(count: u64) {
    ::metrics::gauge!("proxy_transactions_in_flight").set(count as f64);
}

pub fn record_hook_failure(phase: &'static str) {
    ::metrics::counter!("proxy_hook_failures_total", "phase" => phase).increment(1);
}
