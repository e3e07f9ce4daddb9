//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if another global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused at the connection limit (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Successful registrations (counter).
pub const RELAY_REGISTRATIONS_TOTAL: &str = "relay_registrations_total";
/// `send_message` events by delivery outcome (counter, labels: outcome).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Frames discarded as malformed (counter).
pub const RELAY_MALFORMED_FRAMES_TOTAL: &str = "relay_malformed_frames_total";
