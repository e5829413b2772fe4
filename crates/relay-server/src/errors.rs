//! Relay server error types.

use std::net::SocketAddr;

/// Errors raised while starting or running the relay listener.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configured host/port could not be parsed or resolved.
    #[error("invalid bind address {addr}: {source}")]
    Resolve {
        /// The `host:port` string that failed.
        addr: String,
        /// Underlying resolver error.
        source: std::io::Error,
    },

    /// Listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: SocketAddr,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Other I/O failure on the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
