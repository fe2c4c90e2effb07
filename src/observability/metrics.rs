//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ws_proxy_requests_total` (counter): handled requests by terminal outcome
//! - `ws_proxy_active_sessions` (gauge): sessions currently spliced
//! - `ws_proxy_session_bytes_total` (counter): bytes copied by direction

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::http::splice::Direction;

pub const REQUESTS_TOTAL: &str = "ws_proxy_requests_total";
pub const ACTIVE_SESSIONS: &str = "ws_proxy_active_sessions";
pub const SESSION_BYTES_TOTAL: &str = "ws_proxy_session_bytes_total";

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Count a request by the label of its terminal state.
pub fn record_outcome(outcome: &'static str) {
    metrics::counter!(REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Count bytes that crossed the proxy in one direction.
pub fn record_bytes(direction: Direction, bytes: u64) {
    metrics::counter!(SESSION_BYTES_TOTAL, "direction" => direction.as_str()).increment(bytes);
}

/// Keeps `ws_proxy_active_sessions` accurate on every exit path.
#[derive(Debug)]
pub struct ActiveSession(());

impl ActiveSession {
    pub fn start() -> Self {
        metrics::gauge!(ACTIVE_SESSIONS).increment(1.0);
        Self(())
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        metrics::gauge!(ACTIVE_SESSIONS).decrement(1.0);
    }
}
