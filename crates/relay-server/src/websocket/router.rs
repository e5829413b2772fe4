//! Message dispatch by `type` on a parsed envelope.

use metrics::counter;
use tracing::{debug, instrument, warn};

use super::connection::{ClientConnection, Role};
use super::registry::ClientRegistry;
use crate::message::{Envelope, MessageType, ServerMessage};
use crate::metrics::MESSAGES_TOTAL;

/// What the router did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Answered the sender directly.
    Replied,
    /// Fanned out to every open member of `role`.
    Broadcast {
        /// Target role set.
        role: Role,
        /// Recipients that accepted the frame.
        delivered: usize,
    },
    /// Refused; the sender got an `error` reply.
    Rejected {
        /// The offending `type` string.
        kind: String,
    },
}

/// Route one envelope from `sender`.
#[instrument(skip_all, fields(conn_id = %sender.id, role = %sender.role, message_type = envelope.kind()))]
pub fn dispatch(envelope: Envelope, sender: &ClientConnection, registry: &ClientRegistry) -> Dispatch {
    let label = envelope.message_type().map_or("unknown", MessageType::as_str);
    counter!(MESSAGES_TOTAL, "type" => label).increment(1);

    match envelope.message_type() {
        Some(MessageType::Ping) => {
            let _ = sender.send_json(&ServerMessage::pong());
            Dispatch::Replied
        }
        Some(MessageType::GptResponse) => forward(envelope, Role::Browser, registry),
        Some(MessageType::ScreenshotRequest) => forward(envelope, Role::Desktop, registry),
        Some(MessageType::ConnectionStatus) => {
            warn!("client sent connection_status, rejecting");
            let _ = sender.send_json(&ServerMessage::error(
                "connection_status is reserved for the server",
            ));
            Dispatch::Rejected {
                kind: envelope.kind().to_owned(),
            }
        }
        Some(MessageType::Pong | MessageType::Error) | None => {
            let kind = envelope.kind().to_owned();
            warn!(kind, "unhandled message type");
            let _ = sender.send_json(&ServerMessage::error(format!(
                "Unhandled message type: {kind}"
            )));
            Dispatch::Rejected { kind }
        }
    }
}

fn forward(envelope: Envelope, role: Role, registry: &ClientRegistry) -> Dispatch {
    let envelope = envelope.with_timestamp();
    let delivered = registry.broadcast(role, &envelope);
    debug!(target_role = %role, delivered, "forwarded");
    Dispatch::Broadcast { role, delivered }
}
