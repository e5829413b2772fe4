//! Wire envelope: inbound frames from clients and server-originated messages.

use chrono::{SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Message `type` vocabulary understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Application-level ping; answered with [`MessageType::Pong`].
    Ping,
    /// Reply to an application-level ping.
    Pong,
    /// Error report sent to a single client.
    Error,
    /// Presence notification emitted by the relay.
    ConnectionStatus,
    /// Model output produced on the desktop, shown in browsers.
    GptResponse,
    /// Capture request from a browser, handled by desktops.
    ScreenshotRequest,
}

impl MessageType {
    /// Parse a wire `type` string.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "error" => Some(Self::Error),
            "connection_status" => Some(Self::ConnectionStatus),
            "gpt_response" => Some(Self::GptResponse),
            "screenshot_request" => Some(Self::ScreenshotRequest),
            _ => None,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::ConnectionStatus => "connection_status",
            Self::GptResponse => "gpt_response",
            Self::ScreenshotRequest => "screenshot_request",
        }
    }
}

/// Why an inbound frame could not be turned into an [`Envelope`].
#[derive(Debug, Error)]
pub enum FrameError {
    /// Payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Payload is JSON but not an object.
    #[error("message must be a JSON object")]
    NotAnObject,
    /// Object has no string `type` field.
    #[error("message has no string \"type\" field")]
    MissingType,
    /// Binary frame that is not UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

/// A parsed client frame.
///
/// All fields are kept verbatim so broadcasts forward the payload unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let Value::Object(fields) = serde_json::from_str::<Value>(text)? else {
            return Err(FrameError::NotAnObject);
        };
        if !matches!(fields.get("type"), Some(Value::String(_))) {
            return Err(FrameError::MissingType);
        }
        Ok(Self { fields })
    }

    /// Parse a binary frame carrying UTF-8 JSON.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotUtf8)?;
        Self::parse(text)
    }

    /// Raw `type` string.
    pub fn kind(&self) -> &str {
        self.get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Known message type, if the `type` string is part of the vocabulary.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(self.kind())
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Stamp `timestamp` with the current time unless the sender set one.
    ///
    /// Missing, `null`, `false`, `0` and `""` all count as unset.
    #[must_use]
    pub fn with_timestamp(mut self) -> Self {
        let unset = match self.get("timestamp") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => !b,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Number(n)) => n.as_f64() == Some(0.0),
            Some(_) => false,
        };
        if unset {
            let _ = self
                .fields
                .insert("timestamp".into(), Value::String(timestamp_now()));
        }
        self
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// Presence states carried by `connection_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Sent to a client right after it connects.
    Connected,
    /// A desktop joined; sent to browsers.
    DesktopConnected,
    /// A desktop left; sent to browsers.
    DesktopDisconnected,
}

/// Messages originated by the relay itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to `ping`.
    Pong {
        /// Server time.
        timestamp: String,
    },
    /// Error reply to the sender of a bad frame.
    Error {
        /// Human-readable reason.
        error: String,
        /// Server time.
        timestamp: String,
    },
    /// Presence notification.
    ConnectionStatus {
        /// What changed.
        status: ConnectionStatus,
        /// Whether any desktop is connected (browser welcome only).
        #[serde(rename = "desktopConnected", skip_serializing_if = "Option::is_none")]
        desktop_connected: Option<bool>,
        /// Server time.
        timestamp: String,
    },
}

impl ServerMessage {
    /// `pong` stamped now.
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: timestamp_now(),
        }
    }

    /// `error` stamped now.
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            timestamp: timestamp_now(),
        }
    }

    /// `connection_status` stamped now.
    pub fn status(status: ConnectionStatus, desktop_connected: Option<bool>) -> Self {
        Self::ConnectionStatus {
            status,
            desktop_connected,
            timestamp: timestamp_now(),
        }
    }
}

/// Current time as RFC 3339 with millisecond precision, e.g.
/// `2026-01-01T00:00:00.000Z`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
