//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use chitchat_core::HubStats;
use chitchat_protocol::EventKind;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chitchat_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chitchat_connections_active";
    pub const SESSIONS_ACTIVE: &str = "chitchat_sessions_active";
    pub const LAMPORT_CLOCK: &str = "chitchat_lamport_clock";
    pub const EVENTS_TOTAL: &str = "chitchat_events_total";
    pub const DELIVERIES: &str = "chitchat_deliveries";
    pub const PUBLISH_REJECTED_TOTAL: &str = "chitchat_publish_rejected_total";
    pub const FRAMES_BYTES: &str = "chitchat_frames_bytes";
    pub const LATENCY_SECONDS: &str = "chitchat_request_latency_seconds";
    pub const ERRORS_TOTAL: &str = "chitchat_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of joined sessions");
    metrics::describe_gauge!(names::LAMPORT_CLOCK, "Current server Lamport clock");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Broadcast events by kind");
    metrics::describe_gauge!(
        names::DELIVERIES,
        "Event deliveries since start by outcome"
    );
    metrics::describe_counter!(
        names::PUBLISH_REJECTED_TOTAL,
        "Publish requests rejected by validation"
    );
    metrics::describe_counter!(names::FRAMES_BYTES, "Frame bytes by direction");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Request processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a broadcast event.
pub fn record_event(kind: EventKind) {
    counter!(names::EVENTS_TOTAL, "kind" => kind.label()).increment(1);
}

/// Record a rejected publish.
pub fn record_rejected_publish() {
    counter!(names::PUBLISH_REJECTED_TOTAL).increment(1);
}

/// Record frame bytes.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record request latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Publish hub gauges.
pub fn set_hub_stats(stats: HubStats) {
    gauge!(names::SESSIONS_ACTIVE).set(stats.sessions as f64);
    gauge!(names::LAMPORT_CLOCK).set(stats.clock as f64);
    gauge!(names::DELIVERIES, "outcome" => "ok").set(stats.delivered as f64);
    gauge!(names::DELIVERIES, "outcome" => "failed").set(stats.delivery_failures as f64);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        // No recorder installed: every call is a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_event(EventKind::Chat);
        record_rejected_publish();
        set_hub_stats(HubStats {
            clock: 3,
            sessions: 2,
            delivered: 5,
            delivery_failures: 1,
        });
    }
}
