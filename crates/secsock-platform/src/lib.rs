//! Collaborator contracts for the secsock protocol engine.
//!
//! The engine never talks to cryptography, credentials, event routing or
//! application operations directly. It consumes them through the traits in
//! [`traits`]:
//! - `KeyStore`: per-peer key pairs and shared secrets ([`keyring::Keyring`])
//! - `CredentialProvider`: the query token appended to the socket URL
//! - `EventRouter`: middlewares, post-event hooks and deferred continuations
//! - `OperationRegistry`: named application operations
//!
//! [`mock`] provides deterministic implementations for tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod keyring;
pub mod mock;
pub mod traits;

pub use error::{Error, Result};
pub use keyring::Keyring;
pub use traits::{
    AfterHook, CredentialProvider, EventRouter, Invocation, KeyStore, OperationRegistry, Phase,
};
