//! Metrics collection and export for Courier.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use courier_core::HubStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const EVENTS_TOTAL: &str = "courier_events_total";
    pub const EVENTS_BYTES: &str = "courier_events_bytes";
    pub const REGISTERED_USERS: &str = "courier_registered_users";
    pub const PAYMENT_SESSIONS: &str = "courier_payment_sessions";
    pub const LOGGED_MESSAGES: &str = "courier_logged_messages";
    pub const EVICTED_MESSAGES: &str = "courier_message_log_evicted_total";
    pub const ROUTE_FAILURES_TOTAL: &str = "courier_route_failures_total";
    pub const MALFORMED_TOTAL: &str = "courier_malformed_frames_total";
    pub const NOTIFIER_PUSHES_TOTAL: &str = "courier_notifier_pushes_total";
    pub const LATENCY_SECONDS: &str = "courier_latency_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of events processed");
    metrics::describe_counter!(names::EVENTS_BYTES, "Total bytes of events processed");
    metrics::describe_gauge!(names::REGISTERED_USERS, "Currently registered identities");
    metrics::describe_gauge!(names::PAYMENT_SESSIONS, "Payment sessions in progress");
    metrics::describe_gauge!(names::LOGGED_MESSAGES, "Messages held in the message log");
    metrics::describe_counter!(
        names::EVICTED_MESSAGES,
        "Message log entries dropped to stay under the cap"
    );
    metrics::describe_counter!(
        names::ROUTE_FAILURES_TOTAL,
        "Events that could not be routed, by kind"
    );
    metrics::describe_counter!(names::MALFORMED_TOTAL, "Frames that failed to decode");
    metrics::describe_counter!(
        names::NOTIFIER_PUSHES_TOTAL,
        "Payment success notifications sent"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound event handling latency in seconds"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

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

/// Record an event.
pub fn record_event(bytes: usize, direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "direction" => direction).increment(1);
    counter!(names::EVENTS_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record event handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a routing failure.
pub fn record_route_failure(kind: &'static str) {
    counter!(names::ROUTE_FAILURES_TOTAL, "kind" => kind).increment(1);
}

/// Record a frame that failed to decode.
pub fn record_malformed(surface: &'static str) {
    counter!(names::MALFORMED_TOTAL, "surface" => surface).increment(1);
}

/// Publish the number of payment success notifications sent so far.
pub fn set_notifier_pushes(total: u64) {
    counter!(names::NOTIFIER_PUSHES_TOTAL).absolute(total);
}

/// Update registry, session and message log metrics.
pub fn set_hub_stats(stats: &HubStats) {
    gauge!(names::REGISTERED_USERS).set(stats.registered as f64);
    gauge!(names::PAYMENT_SESSIONS).set(stats.sessions as f64);
    gauge!(names::LOGGED_MESSAGES).set(stats.logged_messages as f64);
    counter!(names::EVICTED_MESSAGES).absolute(stats.evicted_messages);
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
