//! Metrics collection and exposition.
//!
//! # Metrics
//! - `server_requests_total` (counter): requests by method, status
//! - `server_request_duration_seconds` (histogram): latency distribution
//! - `server_active_connections` (gauge): current connection count
//! - `server_connections_total` (counter): accepted connections
//! - `server_aborted_connections_total` (counter): connections killed at the shutdown deadline
//! - `server_shutdowns_total` (counter): terminal lifecycle outcomes
//! - `server_shutdown_duration_seconds` (histogram): signal to terminal state
//!
//! Without an installed recorder every call here is a no-op.

use std::net::{AddrParseError, SocketAddr};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Histogram buckets for duration metrics (in seconds).
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Error type for metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("invalid metrics address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },

    #[error("failed to install Prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Install the global recorder and serve the Prometheus scrape endpoint.
pub fn init_metrics(address: &str) -> Result<(), MetricsError> {
    let addr: SocketAddr = address.parse().map_err(|source| MetricsError::InvalidAddress {
        address: address.to_string(),
        source,
    })?;

    PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)?
        .with_http_listener(addr)
        .install()?;

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, started: Instant) {
    counter!(
        "server_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("server_request_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn connection_opened(active: u64) {
    counter!("server_connections_total").increment(1);
    gauge!("server_active_connections").set(active as f64);
}

pub fn connection_closed(active: u64) {
    gauge!("server_active_connections").set(active as f64);
}

pub fn record_aborted_connections(count: usize) {
    counter!("server_aborted_connections_total").increment(count as u64);
}

/// Record how a run ended.
pub fn record_shutdown(outcome: &'static str, elapsed: Duration) {
    counter!("server_shutdowns_total", "outcome" => outcome).increment(1);
    histogram!("server_shutdown_duration_seconds").record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_address() {
        let err = init_metrics("not-an-address").unwrap_err();
        assert!(matches!(err, MetricsError::InvalidAddress { .. }));
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_request("GET", 200, Instant::now());
        connection_opened(1);
        connection_closed(0);
        record_aborted_connections(2);
        record_shutdown("drained", Duration::from_millis(3));
    }
}
