//! Client registry: live connections indexed by id and partitioned by role.
//!
//! The id map and both role sets sit behind one lock and change together.
//! The only frame queued under the lock is a newcomer's own welcome, so it
//! always precedes any broadcast; broadcasts iterate a snapshot taken under
//! the read lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, ConnectionId, Role};
use crate::message::{ConnectionStatus, ServerMessage};
use crate::metrics::{BROADCAST_DROPS_TOTAL, CONNECTIONS_ACTIVE};

/// Registry mutation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A connection with this id is already registered.
    #[error("connection {0} is already registered")]
    DuplicateId(ConnectionId),
}

#[derive(Default)]
struct Members {
    by_id: HashMap<ConnectionId, Arc<ClientConnection>>,
    desktops: HashSet<ConnectionId>,
    browsers: HashSet<ConnectionId>,
}

impl Members {
    fn role_set(&self, role: Role) -> &HashSet<ConnectionId> {
        match role {
            Role::Desktop => &self.desktops,
            Role::Browser => &self.browsers,
        }
    }

    fn role_set_mut(&mut self, role: Role) -> &mut HashSet<ConnectionId> {
        match role {
            Role::Desktop => &mut self.desktops,
            Role::Browser => &mut self.browsers,
        }
    }
}

/// Tracks every live connection and fans messages out by role.
#[derive(Default)]
pub struct ClientRegistry {
    members: RwLock<Members>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and queue its `connected` welcome.
    ///
    /// Browsers learn whether a desktop is present from the welcome. A
    /// desktop joining notifies every browser with
    /// `connection_status: desktop_connected`.
    pub fn add(&self, connection: Arc<ClientConnection>) -> Result<(), RegistryError> {
        let id = connection.id;
        let role = connection.role;
        {
            let mut members = self.members.write();
            if members.by_id.contains_key(&id) {
                return Err(RegistryError::DuplicateId(id));
            }
            let welcome = match role {
                Role::Browser => ServerMessage::status(
                    ConnectionStatus::Connected,
                    Some(!members.desktops.is_empty()),
                ),
                Role::Desktop => ServerMessage::status(ConnectionStatus::Connected, None),
            };
            // Queued before insertion so no broadcast can overtake it.
            let _ = connection.send_json(&welcome);
            let _ = members.role_set_mut(role).insert(id);
            let _ = members.by_id.insert(id, connection);
        }
        gauge!(CONNECTIONS_ACTIVE, "role" => role.as_str()).increment(1.0);
        debug!(conn_id = %id, %role, "connection registered");

        if role == Role::Desktop {
            let notified = self.broadcast(
                Role::Browser,
                &ServerMessage::status(ConnectionStatus::DesktopConnected, None),
            );
            info!(conn_id = %id, notified, "desktop connected, browsers notified");
        }
        Ok(())
    }

    /// Unregister a connection. Removing an unknown id is a no-op.
    ///
    /// Only the call that actually removes the connection gets it back, so
    /// close and heartbeat eviction racing on the same id notify browsers of
    /// a desktop departure exactly once.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = {
            let mut members = self.members.write();
            let connection = members.by_id.remove(&id)?;
            let _ = members.role_set_mut(connection.role).remove(&id);
            connection
        };
        let role = removed.role;
        gauge!(CONNECTIONS_ACTIVE, "role" => role.as_str()).decrement(1.0);
        debug!(conn_id = %id, %role, "connection unregistered");

        if role == Role::Desktop {
            let notified = self.broadcast(
                Role::Browser,
                &ServerMessage::status(ConnectionStatus::DesktopDisconnected, None),
            );
            info!(conn_id = %id, notified, "desktop disconnected, browsers notified");
        }
        Some(removed)
    }

    /// Whether a connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().by_id.contains_key(&id)
    }

    /// Total registered connections.
    pub fn len(&self) -> usize {
        self.members.read().by_id.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.members.read().by_id.is_empty()
    }

    /// Number of connections with the given role.
    pub fn count_of(&self, role: Role) -> usize {
        self.members.read().role_set(role).len()
    }

    /// Stable copy of one role set.
    pub fn snapshot(&self, role: Role) -> Vec<Arc<ClientConnection>> {
        let members = self.members.read();
        members
            .role_set(role)
            .iter()
            .filter_map(|id| members.by_id.get(id).cloned())
            .collect()
    }

    /// Stable copy of every registered connection.
    pub fn snapshot_all(&self) -> Vec<Arc<ClientConnection>> {
        self.members.read().by_id.values().cloned().collect()
    }

    /// Send `message` to every open connection with `role`.
    ///
    /// Serializes once. Connections that are no longer open are skipped; a
    /// failed enqueue is logged and never affects other recipients.
    /// Returns the number of connections that accepted the frame.
    pub fn broadcast<T: Serialize>(&self, role: Role, message: &T) -> usize {
        let text: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(%role, error = %e, "failed to serialize broadcast");
                return 0;
            }
        };

        let recipients = self.snapshot(role);
        let mut delivered = 0;
        for conn in &recipients {
            if !conn.is_open() {
                continue;
            }
            if conn.send(Arc::clone(&text)) {
                delivered += 1;
            } else {
                counter!(BROADCAST_DROPS_TOTAL, "role" => role.as_str()).increment(1);
                warn!(
                    conn_id = %conn.id,
                    %role,
                    dropped = conn.drop_count(),
                    "failed to queue broadcast for client"
                );
            }
        }
        debug!(%role, recipients = recipients.len(), delivered, "broadcast");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use tokio::sync::mpsc;

    fn make_connection(role: Role) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::new(), role, tx);
        (Arc::new(conn), rx)
    }

    fn next_json(rx: &mut mpsc::Receiver<Outbound>) -> Option<serde_json::Value> {
        match rx.try_recv().ok()? {
            Outbound::Text(text) => serde_json::from_str(&text).ok(),
            Outbound::Probe => None,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) {
        while rx.try_recv().is_ok() {}
    }

    fn assert_partition(registry: &ClientRegistry) {
        let members = registry.members.read();
        assert_eq!(
            members.by_id.len(),
            members.desktops.len() + members.browsers.len()
        );
        assert!(members.desktops.is_disjoint(&members.browsers));
        for (id, conn) in &members.by_id {
            assert!(members.role_set(conn.role).contains(id));
        }
    }

    #[test]
    fn add_places_connection_in_role_set() {
        let registry = ClientRegistry::new();
        let (desktop, _d) = make_connection(Role::Desktop);
        let (browser, _b) = make_connection(Role::Browser);
        registry.add(desktop).unwrap();
        registry.add(browser).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.count_of(Role::Desktop), 1);
        assert_eq!(registry.count_of(Role::Browser), 1);
        assert_partition(&registry);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let registry = ClientRegistry::new();
        let (conn, _rx) = make_connection(Role::Browser);
        registry.add(Arc::clone(&conn)).unwrap();
        assert_eq!(
            registry.add(Arc::clone(&conn)),
            Err(RegistryError::DuplicateId(conn.id))
        );
        assert_eq!(registry.len(), 1);
        assert_partition(&registry);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ClientRegistry::new();
        let (conn, _rx) = make_connection(Role::Desktop);
        let (other, _o) = make_connection(Role::Browser);
        registry.add(Arc::clone(&conn)).unwrap();
        registry.add(other).unwrap();

        assert!(registry.remove(conn.id).is_some());
        assert!(registry.remove(conn.id).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.count_of(Role::Desktop), 0);
        assert_eq!(registry.count_of(Role::Browser), 1);
        assert_partition(&registry);
    }

    #[test]
    fn remove_unknown_id_is_noop() {
        let registry = ClientRegistry::new();
        assert!(registry.remove(ConnectionId::new()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn desktop_join_and_leave_notify_browsers_only() {
        let registry = ClientRegistry::new();
        let (b1, mut rx_b1) = make_connection(Role::Browser);
        let (b2, mut rx_b2) = make_connection(Role::Browser);
        let (d_other, mut rx_other) = make_connection(Role::Desktop);
        registry.add(b1).unwrap();
        registry.add(b2).unwrap();
        registry.add(d_other).unwrap();
        for rx in [&mut rx_b1, &mut rx_b2, &mut rx_other] {
            drain(rx);
        }

        let (desktop, _rx_d) = make_connection(Role::Desktop);
        registry.add(Arc::clone(&desktop)).unwrap();
        for rx in [&mut rx_b1, &mut rx_b2] {
            let msg = next_json(rx).unwrap();
            assert_eq!(msg["type"], "connection_status");
            assert_eq!(msg["status"], "desktop_connected");
        }
        assert!(next_json(&mut rx_other).is_none());

        let _ = registry.remove(desktop.id);
        for rx in [&mut rx_b1, &mut rx_b2] {
            assert_eq!(next_json(rx).unwrap()["status"], "desktop_disconnected");
        }
        assert!(next_json(&mut rx_other).is_none());

        // A second removal must not notify again.
        let _ = registry.remove(desktop.id);
        assert!(next_json(&mut rx_b1).is_none());
    }

    #[test]
    fn browser_leave_notifies_nobody() {
        let registry = ClientRegistry::new();
        let (browser, _rx) = make_connection(Role::Browser);
        let (watcher, mut rx_watcher) = make_connection(Role::Browser);
        registry.add(Arc::clone(&browser)).unwrap();
        registry.add(watcher).unwrap();
        drain(&mut rx_watcher);
        let _ = registry.remove(browser.id);
        assert!(next_json(&mut rx_watcher).is_none());
    }

    #[test]
    fn broadcast_reaches_only_target_role() {
        let registry = ClientRegistry::new();
        let (b, mut rx_b) = make_connection(Role::Browser);
        let (d, mut rx_d) = make_connection(Role::Desktop);
        registry.add(b).unwrap();
        registry.add(d).unwrap();
        drain(&mut rx_b);
        drain(&mut rx_d);

        let delivered = registry.broadcast(Role::Desktop, &serde_json::json!({"type": "x"}));
        assert_eq!(delivered, 1);
        assert_eq!(next_json(&mut rx_d).unwrap()["type"], "x");
        assert!(next_json(&mut rx_b).is_none());
    }

    #[test]
    fn broadcast_skips_closed_and_continues_past_failures() {
        let registry = ClientRegistry::new();
        let (closed, _rx_closed) = make_connection(Role::Browser);
        closed.mark_closed();

        // The welcome takes the only slot.
        let (tx_full, _rx_full) = mpsc::channel(1);
        let full = Arc::new(ClientConnection::new(ConnectionId::new(), Role::Browser, tx_full));

        let (healthy, mut rx_healthy) = make_connection(Role::Browser);
        registry.add(closed).unwrap();
        registry.add(Arc::clone(&full)).unwrap();
        registry.add(healthy).unwrap();
        assert_eq!(full.drop_count(), 0);
        drain(&mut rx_healthy);

        let delivered = registry.broadcast(Role::Browser, &serde_json::json!({"type": "y"}));
        assert_eq!(delivered, 1);
        assert_eq!(full.drop_count(), 1);
        assert_eq!(next_json(&mut rx_healthy).unwrap()["type"], "y");
    }

    #[test]
    fn broadcast_to_empty_role_delivers_nothing() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.broadcast(Role::Desktop, &serde_json::json!({})), 0);
    }

    #[test]
    fn snapshot_is_stable_after_removal() {
        let registry = ClientRegistry::new();
        let (a, _ra) = make_connection(Role::Browser);
        let (b, _rb) = make_connection(Role::Browser);
        registry.add(Arc::clone(&a)).unwrap();
        registry.add(b).unwrap();

        let snapshot = registry.snapshot(Role::Browser);
        let _ = registry.remove(a.id);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.snapshot(Role::Browser).len(), 1);
        assert_eq!(registry.snapshot_all().len(), 1);
    }

    #[test]
    fn concurrent_add_remove_keeps_partition() {
        let registry = Arc::new(ClientRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let role = if i % 2 == 0 { Role::Desktop } else { Role::Browser };
                    for _ in 0..50 {
                        let (tx, _rx) = mpsc::channel(4);
                        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), role, tx));
                        registry.add(Arc::clone(&conn)).unwrap();
                        let _ = registry.remove(conn.id);
                        let _ = registry.remove(conn.id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
        assert_partition(&registry);
    }

    #[test]
    fn contains_tracks_membership() {
        let registry = ClientRegistry::new();
        let (conn, _rx) = make_connection(Role::Desktop);
        registry.add(Arc::clone(&conn)).unwrap();
        assert!(registry.contains(conn.id));
        assert!(!registry.contains(ConnectionId::new()));
    }

    #[test]
    fn welcome_reports_desktop_presence() {
        let registry = ClientRegistry::new();
        let (early, mut rx_early) = make_connection(Role::Browser);
        registry.add(early).unwrap();
        let welcome = next_json(&mut rx_early).unwrap();
        assert_eq!(welcome["type"], "connection_status");
        assert_eq!(welcome["status"], "connected");
        assert_eq!(welcome["desktopConnected"], false);

        let (desktop, mut rx_d) = make_connection(Role::Desktop);
        registry.add(desktop).unwrap();
        let welcome = next_json(&mut rx_d).unwrap();
        assert_eq!(welcome["status"], "connected");
        assert!(welcome.get("desktopConnected").is_none());

        let (late, mut rx_late) = make_connection(Role::Browser);
        registry.add(late).unwrap();
        assert_eq!(next_json(&mut rx_late).unwrap()["desktopConnected"], true);
        assert!(next_json(&mut rx_late).is_none());
    }

    #[test]
    fn duplicate_add_does_not_welcome_twice() {
        let registry = ClientRegistry::new();
        let (conn, mut rx) = make_connection(Role::Browser);
        registry.add(Arc::clone(&conn)).unwrap();
        assert!(registry.add(conn).is_err());
        assert!(next_json(&mut rx).is_some());
        assert!(next_json(&mut rx).is_none());
    }

    #[test]
    fn welcome_always_precedes_desktop_notice() {
        let registry = Arc::new(ClientRegistry::new());
        let browsers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let (conn, rx) = make_connection(Role::Browser);
                    registry.add(conn).unwrap();
                    rx
                })
            })
            .collect();
        let desktops: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let (conn, _rx) = make_connection(Role::Desktop);
                    registry.add(conn).unwrap();
                })
            })
            .collect();
        for handle in desktops {
            handle.join().unwrap();
        }
        for handle in browsers {
            let mut rx = handle.join().unwrap();
            assert_eq!(next_json(&mut rx).unwrap()["status"], "connected");
        }
    }
}
