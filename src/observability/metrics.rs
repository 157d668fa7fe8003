//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_events_total` (counter): ledger events by outcome
//! - `bridge_submissions_total` (counter): submission attempts by result
//! - `bridge_submission_duration_seconds` (histogram): submit round-trip
//! - `bridge_pending_transactions` (gauge): transactions not yet terminal
//! - `bridge_config_version` (gauge): active configuration version
//! - `bridge_reconciliation_flags_total` (counter): mismatches raised
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op
//! - Labels are low-cardinality outcome names, never ids

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Count a processed ledger event by outcome (`settled`, `failed`, `abandoned`,
/// `pending`, `duplicate`, `error`).
pub fn record_event(outcome: &'static str) {
    metrics::counter!("bridge_events_total", "outcome" => outcome).increment(1);
}

/// Count a submission attempt by result and record its duration.
pub fn record_submission(result: &'static str, elapsed: Duration) {
    metrics::counter!("bridge_submissions_total", "result" => result).increment(1);
    metrics::histogram!("bridge_submission_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn set_pending(count: usize) {
    metrics::gauge!("bridge_pending_transactions").set(count as f64);
}

pub fn set_config_version(version: u64) {
    metrics::gauge!("bridge_config_version").set(version as f64);
}

pub fn record_flag() {
    metrics::counter!("bridge_reconciliation_flags_total").increment(1);
}
