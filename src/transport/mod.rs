//! The `transport` module carries status traffic between the broadcast
//! service and dashboards over WebSockets.
//!
//! It defines the JSON message protocol spoken in both directions and the
//! server that accepts subscribers, resolves their topic from the handshake
//! and forwards their commands to the broker.

pub mod message;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use websocket::{serve, start_websocket_server};
