//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_protocol::EventKind;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const ACTIONS_TOTAL: &str = "huddle_actions_total";
    pub const DELIVERY_FAILURES_TOTAL: &str = "huddle_delivery_failures_total";
    pub const ROOMS_ACTIVE: &str = "huddle_rooms_active";
    pub const FRAMES_BYTES: &str = "huddle_frames_bytes";
    pub const ACTION_LATENCY_SECONDS: &str = "huddle_action_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
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
    metrics::describe_counter!(names::ACTIONS_TOTAL, "Room actions routed, by kind");
    metrics::describe_counter!(
        names::DELIVERY_FAILURES_TOTAL,
        "Presence events the broadcast sink failed to publish"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one participant");
    metrics::describe_counter!(names::FRAMES_BYTES, "Bytes of frames sent and received");
    metrics::describe_histogram!(
        names::ACTION_LATENCY_SECONDS,
        "Time from receiving a room action to its broadcast, in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a routed room action.
pub fn record_action(kind: EventKind, seconds: f64) {
    counter!(names::ACTIONS_TOTAL, "kind" => kind.as_str()).increment(1);
    histogram!(names::ACTION_LATENCY_SECONDS, "kind" => kind.as_str()).record(seconds);
}

/// Record a failed broadcast.
pub fn record_delivery_failure() {
    counter!(names::DELIVERY_FAILURES_TOTAL).increment(1);
}

/// Update the active room gauge.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record frame bytes in a direction (`inbound` or `outbound`).
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
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
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
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
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        // No recorder installed: every call is a no-op
        let _guard = ConnectionMetricsGuard::new();
        record_action(EventKind::Join, 0.001);
        record_delivery_failure();
        set_active_rooms(3);
        record_frame(128, "inbound");
        record_error("decode");
    }
}
