//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Handle backed by a recorder that is not installed globally.
///
/// Renders nothing; useful for servers built in tests.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Connections accepted total (counter, labels: role).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections closed total (counter, labels: role).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Connections currently registered (gauge, labels: role).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Broadcast deliveries dropped (counter, labels: role).
pub const BROADCAST_DROPS_TOTAL: &str = "relay_broadcast_drops_total";
/// Inbound messages handled (counter, labels: type).
pub const MESSAGES_TOTAL: &str = "relay_messages_total";
/// Inbound frames rejected as malformed (counter).
pub const MALFORMED_FRAMES_TOTAL: &str = "relay_malformed_frames_total";
/// Connections evicted by the heartbeat (counter, labels: role).
pub const HEARTBEAT_EVICTIONS_TOTAL: &str = "relay_heartbeat_evictions_total";
