//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, ConnectionId, Outbound, Role};
use super::registry::ClientRegistry;
use super::router;
use crate::message::{Envelope, ServerMessage};
use crate::metrics::{CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL, MALFORMED_FRAMES_TOTAL};

/// Reply sent for frames that are not a JSON object with a string `type`.
pub const INVALID_FORMAT: &str = "Invalid message format";

/// Run a relay session for an upgraded socket.
///
/// 1. Registers the connection, which queues the welcome `connection_status`
/// 2. Spawns a writer draining the outbound queue in order
/// 3. Parses inbound frames and hands envelopes to the router
/// 4. Unregisters once on close, transport error, eviction or shutdown
#[instrument(skip_all, fields(conn_id = %id, role = %role))]
pub async fn run_session(
    ws: WebSocket,
    id: ConnectionId,
    role: Role,
    registry: Arc<ClientRegistry>,
    shutdown: CancellationToken,
    queue_capacity: usize,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Outbound>(queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(id, role, send_tx));

    if let Err(e) = registry.add(Arc::clone(&connection)) {
        warn!(error = %e, "refusing connection");
        return;
    }
    counter!(CONNECTIONS_TOTAL, "role" => role.as_str()).increment(1);
    info!("client connected");

    let writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        shutdown.clone(),
    ));

    loop {
        let frame = tokio::select! {
            () = connection.terminated() => break,
            () = shutdown.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "transport error");
                break;
            }
            None => break,
        };

        let parsed = match msg {
            Message::Text(ref text) => Envelope::parse(text.as_str()),
            Message::Binary(ref data) => Envelope::parse_bytes(data),
            Message::Pong(_) => {
                connection.mark_alive();
                continue;
            }
            Message::Ping(_) => continue,
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
        };

        match parsed {
            Ok(envelope) => {
                let _ = router::dispatch(envelope, &connection, &registry);
            }
            Err(e) => {
                counter!(MALFORMED_FRAMES_TOTAL).increment(1);
                debug!(error = %e, "malformed frame");
                let _ = connection.send_json(&ServerMessage::error(INVALID_FORMAT));
            }
        }
    }

    connection.mark_closed();
    // Writer exits on termination; on shutdown it sends Close first.
    if !shutdown.is_cancelled() {
        connection.terminate();
    }
    let _ = writer.await;
    connection.terminate();

    if registry.remove(id).is_some() {
        counter!(DISCONNECTIONS_TOTAL, "role" => role.as_str()).increment(1);
    }
    info!(
        age_secs = connection.age().as_secs(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Outbound>,
    connection: Arc<ClientConnection>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = connection.terminated() => break,
            () = shutdown.cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: Utf8Bytes::from_static("server shutting down"),
                }));
                let _ = ws_tx.send(close).await;
                break;
            }
            frame = send_rx.recv() => {
                let msg = match frame {
                    Some(Outbound::Text(text)) => Message::Text(String::from(&*text).into()),
                    Some(Outbound::Probe) => Message::Ping(Bytes::new()),
                    None => break,
                };
                if ws_tx.send(msg).await.is_err() {
                    connection.mark_closed();
                    break;
                }
            }
        }
    }
}
