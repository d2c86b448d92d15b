//! Protocol engine for the secsock end-to-end encrypted socket client.
//!
//! The engine keeps one authenticated, encrypted channel to a server and,
//! through it, to any peer the server can reach:
//! - Transport handshake on the first frame of every connection
//! - Per-peer key exchange, started lazily on first contact
//! - Envelope sealing (peer layer, then transport layer) and dispatch
//! - Request/response correlation with a pending query table
//! - Subscriptions pushed back as `next` envelopes
//! - Keepalive pings, throttled connects and automatic reconnects
//!
//! Cryptography, credentials, event routing, application operations and the
//! socket itself are collaborators (see `secsock_platform` and
//! [`transport::Connector`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
mod query;
pub mod transport;

pub use config::EngineConfig;
pub use engine::{Collaborators, ConnectionState, Engine, SendOptions, SocketEvent};
pub use envelope::{Envelope, EnvelopeKind, SubscribeDirective, WorkerProcess};
pub use error::{Error, Result};
pub use transport::{
    Connector, InboundFrame, Link, LinkCommand, LinkDriver, LinkEvents, LinkHandle, TransportEvent,
};
