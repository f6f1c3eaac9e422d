//! Server-facing WebSocket transport.

pub mod client;
