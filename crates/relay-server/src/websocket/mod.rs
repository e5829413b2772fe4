//! WebSocket connection management, heartbeat, message dispatch, and broadcasting.

pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod router;
pub mod session;
