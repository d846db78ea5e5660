//! Metrics collection and exposition.
//!
//! # Metrics
//! - `db_connect_attempts_total` (counter): connection attempts by outcome
//! - `db_connection_state` (gauge): 1 while connected, 0 otherwise
//!
//! Recording is a no-op until an exporter is installed.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::db::ConnectionState;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connect_attempt(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("db_connect_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_connection_state(state: ConnectionState) {
    let value = if state == ConnectionState::Connected { 1.0 } else { 0.0 };
    metrics::gauge!("db_connection_state").set(value);
}
