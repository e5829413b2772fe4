//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::websocket::connection::Role;
use crate::websocket::registry::ClientRegistry;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections of either role.
    pub connections: usize,
    /// Registered desktop connections.
    pub desktops: usize,
    /// Registered browser connections.
    pub browsers: usize,
}

/// Build a health response from the live registry.
pub fn health_check(start_time: Instant, registry: &ClientRegistry) -> HealthResponse {
    let desktops = registry.count_of(Role::Desktop);
    let browsers = registry.count_of(Role::Browser);
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: desktops + browsers,
        desktops,
        browsers,
    }
}
