//! Shutdown coordination for the listener, heartbeat and relay sessions.
//!
//! One `CancellationToken` tells every task to stop. Sessions are upgraded
//! connections that `axum::serve` does not wait for, so each one holds a
//! [`SessionGuard`] from a shared `TaskTracker` and shutdown waits for the
//! tracker to drain.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{info, warn};

/// Default time allowed for sessions to say goodbye before tasks are aborted.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Held by a running session; the session counts as live until it is dropped.
pub type SessionGuard = TaskTrackerToken;

/// Stop signal plus the set of live sessions.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutdown. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register a session. Taken before the upgrade completes so a session
    /// still handshaking is waited for too.
    pub fn session_guard(&self) -> SessionGuard {
        self.sessions.token()
    }

    /// Sessions that have not finished yet.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Wait until every session guard has been dropped.
    ///
    /// Only meaningful after [`shutdown`](Self::shutdown); new sessions may
    /// otherwise keep arriving.
    pub async fn sessions_drained(&self) {
        self.sessions.close();
        self.sessions.wait().await;
    }

    /// Cancel, then wait up to `timeout` for `handles` and every session.
    ///
    /// Tasks still running after the timeout are aborted.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            sessions = self.active_sessions(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining relay"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = async {
            let _ = futures::future::join_all(handles).await;
            self.sessions_drained().await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                sessions = self.active_sessions(),
                "shutdown timed out after {timeout:?}, aborting remaining tasks"
            );
            for handle in aborts {
                handle.abort();
            }
        }
    }
}
