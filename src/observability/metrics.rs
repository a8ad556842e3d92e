//! Metrics collection and exposition.
//!
//! # Metrics
//! - `forwarder_transactions_success_total` (counter): successfully executed transactions
//! - `forwarder_units_sent_total` (counter): units carried by successful transactions
//! - `forwarder_transactions_failed_total` (counter): executions that returned an error
//! - `forwarder_transactions_requeued_total` (counter): offers accepted by the requeue sink, by reason
//! - `forwarder_transactions_dropped_total` (counter): transactions lost because the sink refused them
//! - `forwarder_breaker_open` (gauge): 1=open or probing, 0=closed, by target
//! - `forwarder_connection_resets_total` (counter): client replacements
//! - `forwarder_inflight_cancellations_total` (counter): executions cancelled by a worker stop
//!
//! Requeues and drops are separate series so data loss never hides among retries.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_success(target: &str) {
    counter!("forwarder_transactions_success_total", "target" => target.to_string()).increment(1);
}

pub fn record_units_sent(units: u64) {
    counter!("forwarder_units_sent_total").increment(units);
}

pub fn record_failure(target: &str) {
    counter!("forwarder_transactions_failed_total", "target" => target.to_string()).increment(1);
}

pub fn record_requeued(reason: &'static str) {
    counter!("forwarder_transactions_requeued_total", "reason" => reason).increment(1);
}

pub fn record_dropped(reason: &'static str) {
    counter!("forwarder_transactions_dropped_total", "reason" => reason).increment(1);
}

pub fn record_breaker_open(target: &str, open: bool) {
    gauge!("forwarder_breaker_open", "target" => target.to_string())
        .set(if open { 1.0 } else { 0.0 });
}

pub fn record_connection_reset(worker_id: usize) {
    counter!("forwarder_connection_resets_total", "worker" => worker_id.to_string()).increment(1);
}

pub fn record_inflight_cancellation(worker_id: usize) {
    counter!("forwarder_inflight_cancellations_total", "worker" => worker_id.to_string())
        .increment(1);
}
