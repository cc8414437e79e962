//! Metrics collection and export for Mingle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "mingle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "mingle_connections_active";
    pub const COMMANDS_TOTAL: &str = "mingle_commands_total";
    pub const EVENTS_TOTAL: &str = "mingle_events_total";
    pub const MATCHES_TOTAL: &str = "mingle_matches_total";
    pub const GROUPS_ACTIVE: &str = "mingle_groups_active";
    pub const PENDING_PURGED_TOTAL: &str = "mingle_pending_purged_total";
    pub const COMMAND_LATENCY_SECONDS: &str = "mingle_command_latency_seconds";
    pub const ERRORS_TOTAL: &str = "mingle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::COMMANDS_TOTAL, "Total client commands processed");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total events pushed to clients");
    metrics::describe_counter!(
        names::MATCHES_TOTAL,
        "Matchmaking attempts by outcome"
    );
    metrics::describe_gauge!(names::GROUPS_ACTIVE, "Current number of conversation groups");
    metrics::describe_counter!(
        names::PENDING_PURGED_TOTAL,
        "Staged messages dropped by TTL expiry"
    );
    metrics::describe_histogram!(
        names::COMMAND_LATENCY_SECONDS,
        "Command processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed client command.
pub fn record_command(kind: &'static str) {
    counter!(names::COMMANDS_TOTAL, "kind" => kind).increment(1);
}

/// Record an event pushed to a client.
pub fn record_event() {
    counter!(names::EVENTS_TOTAL).increment(1);
}

/// Record a matchmaking attempt.
pub fn record_match(outcome: &'static str) {
    counter!(names::MATCHES_TOTAL, "outcome" => outcome).increment(1);
}

/// Update the active group count.
pub fn set_active_groups(count: usize) {
    gauge!(names::GROUPS_ACTIVE).set(count as f64);
}

/// Record staged messages dropped by TTL expiry.
pub fn record_pending_purged(count: usize) {
    counter!(names::PENDING_PURGED_TOTAL).increment(count as u64);
}

/// Record command processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::COMMAND_LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
