//! Collaborator errors.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised by collaborator implementations.
#[derive(Debug, Error)]
pub enum Error {
    /// No key pair or shared secret for the peer.
    #[error("No key material for peer '{0}'")]
    MissingKey(String),

    /// Keystore error.
    #[error("Keystore error: {0}")]
    Keystore(String),

    /// Primitive failure.
    #[error(transparent)]
    Crypto(#[from] secsock_crypto::Error),

    /// Operation failed while executing.
    #[error("Operation '{name}' failed: {reason}")]
    Operation {
        /// Operation name.
        name: String,
        /// Failure text.
        reason: String,
    },

    /// Operation is not registered.
    #[error("Operation '{0}' not found")]
    UnknownOperation(String),

    /// A post-event hook reported failure.
    #[error("Post event {index} for '{process}' returned false")]
    PostEvent {
        /// Process whose hooks ran.
        process: String,
        /// Index of the failing hook.
        index: usize,
    },
}
