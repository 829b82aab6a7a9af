//! The `transport` module exposes the topic manager over WebSockets.
//!
//! A client subscribes to topics (payment ids) and receives one `message`
//! frame per delivered status update, or publishes and deletes topics. Every
//! subscription is held by a forwarding task, so a disconnect or unsubscribe
//! always unregisters the listener.

pub mod message;
pub mod websocket;

pub use websocket::{serve, start_websocket_server};
