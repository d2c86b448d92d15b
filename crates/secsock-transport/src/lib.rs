//! WebSocket transport for the secsock protocol engine.
//!
//! [`websocket::WebSocketConnector`] implements the engine's
//! [`Connector`](secsock_core::Connector): every `open` spawns a task that
//! dials the URL and bridges the socket to a [`LinkDriver`](secsock_core::LinkDriver).
//! Frames are opaque here; sealing and the handshake live in the engine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod websocket;

pub use error::{Error, Result};
pub use websocket::WebSocketConnector;
