//! Collaborator traits consumed by the protocol engine.
//!
//! These traits keep the engine free of concrete cryptography, credential,
//! routing and application code while keeping it testable through mocks.

use crate::error::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use secsock_crypto::Sealed;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Per-peer key material.
///
/// A peer moves through these states:
///
/// ```text
/// absent -> key pair generated -> counterpart key imported -> usable secret
/// ```
///
/// The reserved identity `server` holds the transport-level secret; every
/// other identity is a remote peer reached through the server.
///
/// # Security Requirements
///
/// - Private keys and secrets never leave the store
/// - Every `encrypt` uses a fresh IV
/// - Implementations must be safe to call from concurrent tasks
pub trait KeyStore: Send + Sync {
    /// Generate (or replace) the local key pair for `peer`.
    ///
    /// Any secret previously agreed with `peer` is discarded.
    fn generate_key(&self, peer: &str) -> Result<()>;

    /// Whether a local key pair exists for `peer`.
    fn has_key_pair(&self, peer: &str) -> bool;

    /// Export the local public key for `peer`.
    ///
    /// # Errors
    ///
    /// - `Error::MissingKey` if no key pair was generated for `peer`
    fn export_key(&self, peer: &str) -> Result<Vec<u8>>;

    /// Import the counterpart's public key, completing the shared secret.
    ///
    /// # Errors
    ///
    /// - `Error::MissingKey` if no local key pair exists for `peer`
    /// - `Error::Crypto` if the public key is malformed
    fn import_public_key(&self, public_key: &[u8], peer: &str) -> Result<()>;

    /// Whether a usable shared secret exists for `peer`.
    fn has_secret(&self, peer: &str) -> bool;

    /// Encrypt `plaintext` under the secret shared with `peer`.
    fn encrypt(&self, plaintext: &[u8], peer: &str) -> Result<Sealed>;

    /// Decrypt `iv || ciphertext` under the secret shared with `peer`.
    fn decrypt(&self, sealed: &[u8], peer: &str) -> Result<Vec<u8>>;

    /// Re-derive the secret shared with `peer` using `salt`.
    fn set_secret_salt(&self, peer: &str, salt: &[u8]) -> Result<()>;

    /// Drop all key material for `peer`.
    fn forget(&self, peer: &str);

    /// Fill a buffer of `len` bytes from a CSPRNG.
    fn random_bytes(&self, len: usize) -> Vec<u8>;
}

/// Supplies the query token used when opening the socket.
///
/// Login flows call back into the engine (`logged_in` / `logged_out`); this
/// trait only answers "what is the current token".
pub trait CredentialProvider: Send + Sync {
    /// Current query token, if logged in.
    fn query_token(&self) -> Option<String>;
}

/// Middleware phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Before a locally initiated request leaves the engine.
    Outbound,
    /// After an inbound application envelope was decrypted, before dispatch.
    Inbound,
}

/// Context handed to middlewares and operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    /// Operation name.
    pub process: String,
    /// Remote identity that asked for the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Correlation id of the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    /// Socket URL the request arrived on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Request body.
    #[serde(default)]
    pub payload: Value,
}

impl Invocation {
    /// Context for a locally initiated request.
    pub fn local(process: impl Into<String>, payload: Value) -> Self {
        Self {
            process: process.into(),
            sender: None,
            query_id: None,
            referer: None,
            payload,
        }
    }
}

/// Deferred continuation registered with [`EventRouter::set_after`].
///
/// Resolves to `false` if the continuation could not run.
pub type AfterHook = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Event routing and middleware.
#[async_trait]
pub trait EventRouter: Send + Sync {
    /// Run the middlewares registered for `process`.
    ///
    /// Returns `false` if any middleware disallows the operation.
    async fn run_middlewares(&self, process: &str, invocation: &Invocation, phase: Phase) -> bool;

    /// Register `hook` to run after `event` fires, scoped to `scope`.
    fn set_after(&self, event: &str, hook: AfterHook, scope: &str);

    /// Run post-event hooks for `process` after it produced `output`.
    ///
    /// With `scope` set, only hooks registered for that scope run.
    ///
    /// # Errors
    ///
    /// - `Error::PostEvent` naming the first hook that returned `false`
    async fn check_post_events(
        &self,
        process: &str,
        output: Option<&Value>,
        scope: Option<&str>,
    ) -> Result<()>;
}

/// Registry of named application operations.
#[async_trait]
pub trait OperationRegistry: Send + Sync {
    /// Whether `name` is registered.
    fn exists(&self, name: &str) -> bool;

    /// Invoke `name` with its context and body.
    ///
    /// `Ok(None)` means the operation produced no result to send back.
    ///
    /// # Errors
    ///
    /// - `Error::UnknownOperation` if `name` is not registered
    /// - `Error::Operation` if the operation failed
    async fn call(&self, name: &str, context: &Invocation, body: Value) -> Result<Option<Value>>;
}
