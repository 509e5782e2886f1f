//! Metrics collection and exposition.
//!
//! # Metrics
//! - `l4check_connections_accepted_total` (counter): accepted TCP connections
//! - `l4check_connections_closed_total` (counter): closes by reason
//! - `l4check_active_connections` (gauge): connections currently in the chain
//! - `l4check_keepalive_total` (counter): keepalive configuration by outcome
//! - `l4check_monitor_exits_total` (counter): liveness monitor exits by kind
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed with [`init_metrics`].

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::connection::CloseReason;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_accepted() {
    metrics::counter!("l4check_connections_accepted_total").increment(1);
}

pub fn record_connection_closed(reason: CloseReason) {
    metrics::counter!("l4check_connections_closed_total", "reason" => reason.as_str()).increment(1);
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("l4check_active_connections").set(count as f64);
}

pub fn record_keepalive(outcome: &'static str) {
    metrics::counter!("l4check_keepalive_total", "outcome" => outcome).increment(1);
}

pub fn record_monitor_exit(exit: &'static str) {
    metrics::counter!("l4check_monitor_exits_total", "exit" => exit).increment(1);
}
