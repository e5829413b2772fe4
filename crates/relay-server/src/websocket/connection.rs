//! WebSocket client connection state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Process-unique connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Client class, fixed for the lifetime of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Desktop app producing model responses.
    Desktop,
    /// Browser viewer consuming them.
    Browser,
}

impl Role {
    /// Role from the `clientType` connect parameter.
    ///
    /// Anything other than `desktop` (including absence) is a browser.
    pub fn from_client_type(client_type: Option<&str>) -> Self {
        match client_type {
            Some("desktop") => Self::Desktop,
            _ => Self::Browser,
        }
    }

    /// Wire/label name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Browser => "browser",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame queued for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame.
    Text(Arc<str>),
    /// Transport-level liveness probe (WebSocket Ping).
    Probe,
}

/// Represents a connected WebSocket client.
///
/// The socket itself belongs to the session task; this value only holds the
/// sender half of the session's outbound queue and a termination token.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Desktop or browser.
    pub role: Role,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has answered the last probe.
    is_alive: AtomicBool,
    /// Whether the transport still accepts frames.
    open: AtomicBool,
    /// Cancelled to force the session to drop its socket.
    terminate: CancellationToken,
    /// Count of messages dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, role: Role, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            role,
            tx,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            open: AtomicBool::new(true),
            terminate: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame.
    ///
    /// Returns `false` without queueing if the connection is no longer open.
    /// A full or closed channel also returns `false` and bumps the drop counter.
    pub fn send(&self, text: Arc<str>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.enqueue(Outbound::Text(text))
    }

    /// Serialize a message and queue it.
    pub fn send_json<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send(Arc::from(json)),
            Err(_) => false,
        }
    }

    /// Queue a liveness probe.
    pub fn send_probe(&self) -> bool {
        self.is_open() && self.enqueue(Outbound::Probe)
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (probe answered).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Whether the transport still accepts frames.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Mark the transport closed. Later sends are skipped.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Force the session to drop the socket without a close handshake.
    pub fn terminate(&self) {
        self.mark_closed();
        self.terminate.cancel();
    }

    /// Whether [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Resolves once the connection is terminated.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.terminate.cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
