//! Prometheus Metrics Module
//!
//! Exposes streaming-client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames by decoded kind, protocol errors
//! - **Connection**: state gauge, handshake latency, failovers, reconnects
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder, so the
//! library can be used without an exporter.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the already-installed handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "chart_stream_frames_received_total",
        "Total inbound frames from the quote service by decoded kind"
    );
    describe_counter!(
        "chart_stream_protocol_errors_total",
        "Total inbound frames that could not be decoded"
    );
    describe_counter!(
        "chart_stream_failovers_total",
        "Total handshake timeouts that moved on to the next endpoint"
    );
    describe_counter!(
        "chart_stream_reconnects_total",
        "Total reconnects, by trigger"
    );
    describe_gauge!(
        "chart_stream_connection_state",
        "Connection state (0 disconnected, 1 connecting, 2 connected, 3 error)"
    );
    describe_histogram!(
        "chart_stream_handshake_seconds",
        "Time from connect start to socket open"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// What started a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectTrigger {
    /// Caller asked for it.
    Manual,
    /// Backoff timer fired.
    Automatic,
}

impl ReconnectTrigger {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame_received(kind: &'static str) {
    counter!("chart_stream_frames_received_total", "kind" => kind).increment(1);
}

/// Record a frame that failed to decode.
pub fn record_protocol_error() {
    counter!("chart_stream_protocol_errors_total").increment(1);
}

/// Record a failover to the next endpoint.
pub fn record_failover() {
    counter!("chart_stream_failovers_total").increment(1);
}

/// Record a reconnect.
pub fn record_reconnect(trigger: ReconnectTrigger) {
    counter!("chart_stream_reconnects_total", "trigger" => trigger.as_str()).increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("chart_stream_connection_state").set(state.as_gauge());
}

/// Record handshake duration.
pub fn record_handshake(duration: Duration) {
    histogram!("chart_stream_handshake_seconds").record(duration.as_secs_f64());
}
