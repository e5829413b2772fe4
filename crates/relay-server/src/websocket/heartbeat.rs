//! Heartbeat ping/pong liveness monitoring.
//!
//! One task sweeps the whole registry every period. A connection that has
//! not answered the previous probe is evicted and its socket dropped;
//! everyone else is marked not-alive and probed again. A silent connection
//! is therefore gone within two periods.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::ClientRegistry;
use crate::metrics::HEARTBEAT_EVICTIONS_TOTAL;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that were probed.
    pub probed: usize,
    /// Connections evicted for missing the previous probe.
    pub evicted: usize,
}

/// Periodic liveness sweep over a [`ClientRegistry`].
pub struct HeartbeatMonitor {
    registry: Arc<ClientRegistry>,
    interval: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor with the given sweep period.
    pub fn new(registry: Arc<ClientRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run one sweep.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for conn in self.registry.snapshot_all() {
            if conn.check_alive() {
                // check_alive cleared the flag; the pong sets it again.
                let _ = conn.send_probe();
                report.probed += 1;
                continue;
            }
            if self.registry.remove(conn.id).is_some() {
                report.evicted += 1;
                counter!(HEARTBEAT_EVICTIONS_TOTAL, "role" => conn.role.as_str()).increment(1);
                info!(
                    conn_id = %conn.id,
                    role = %conn.role,
                    age_secs = conn.age().as_secs(),
                    "client missed heartbeat, terminating"
                );
            }
            conn.terminate();
        }
        report
    }

    /// Sweep every period until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep();
                    debug!(probed = report.probed, evicted = report.evicted, "heartbeat sweep");
                }
                () = cancel.cancelled() => {
                    debug!("heartbeat monitor stopped");
                    return;
                }
            }
        }
    }
}
