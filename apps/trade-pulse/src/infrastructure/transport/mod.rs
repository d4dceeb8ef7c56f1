//! Client Transport Adapters
//!
//! Implements the `MarketTransport` port over a WebSocket connection to a
//! hub's `/markethub` endpoint.

mod websocket;

pub use websocket::{WebSocketSession, WebSocketTransport, WebSocketTransportConfig};
