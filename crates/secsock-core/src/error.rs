//! Error types for engine operations.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Engine errors.
///
/// Callers of `send_message` see either a resolved body or one of these; a
/// remote rejection arrives as `Rejected` carrying the remote's text.
#[derive(Debug, Error)]
pub enum Error {
    /// Outbound envelope without a receiver.
    #[error("Receiver not found")]
    ReceiverMissing,

    /// No open, handshaken transport.
    #[error("Socket is not connected")]
    NotConnected,

    /// The key exchange needed before sending could not be started.
    #[error("Error while establishing secure connection with {peer}: {reason}")]
    KeyExchange {
        /// Peer the exchange was addressed to.
        peer: String,
        /// Underlying failure.
        reason: String,
    },

    /// The remote side (or the engine on its behalf) rejected the query.
    #[error("{0}")]
    Rejected(String),

    /// The query was dropped without being resolved.
    #[error("Query {0} was abandoned")]
    Abandoned(String),

    /// An outbound middleware disallowed the operation.
    #[error("Operation {0} blocked by middleware")]
    Blocked(String),

    /// Envelope could not be (de)serialized.
    #[error("Invalid envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key store failure.
    #[error(transparent)]
    KeyStore(#[from] secsock_platform::Error),

    /// Encoding failure on key material.
    #[error(transparent)]
    Crypto(#[from] secsock_crypto::Error),
}
