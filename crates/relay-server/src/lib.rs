//! # relay-server
//!
//! Axum HTTP + `WebSocket` relay pairing desktop producers with browser viewers.
//!
//! - `WebSocket` gateway: role assignment, per-connection writer queues, message dispatch
//! - Client registry with desktop presence notifications to browsers
//! - Heartbeat sweep evicting connections that stop answering pings
//! - HTTP endpoints: banner, health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod message;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::RelayError;
pub use server::RelayServer;
