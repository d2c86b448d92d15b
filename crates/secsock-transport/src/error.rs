//! Transport errors.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Transport errors.
///
/// None of these reach the engine as values. The driver task reports them as
/// a `TransportEvent::Error` followed by an abnormal close.
#[derive(Debug, Error)]
pub enum Error {
    /// URL or subprotocol could not form a handshake request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket failure on an open socket.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
