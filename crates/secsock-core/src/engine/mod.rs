//! The protocol engine.
//!
//! One [`Engine`] owns one logical connection. Its parts:
//! - lifecycle: connect, throttle, close, reconnect, transport events
//! - handshake: the raw key exchange on the first frame of every transport
//! - exchange: per-peer `newKey` / `importKey` negotiation
//! - dispatch: outbound sealing and correlation, inbound routing
//! - keepalive: ping round trips and the watchdog that forces reconnects
//!
//! The engine is cheap to clone; clones share the same connection.

mod dispatch;
mod exchange;
mod handshake;
mod keepalive;
mod lifecycle;

use crate::config::EngineConfig;
use crate::envelope::Envelope;
use crate::query::{Continuation, PendingQuery, PendingQueryTable};
use crate::transport::{Connector, LinkHandle};
use crate::{Error, Result};
use secsock_platform::{CredentialProvider, EventRouter, Invocation, KeyStore, OperationRegistry, Phase};
use serde_json::Value;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Capacity of the socket event channel.
const EVENT_CAPACITY: usize = 64;

/// External collaborators the engine consumes.
#[derive(Clone)]
pub struct Collaborators {
    /// Per-peer key material.
    pub keys: Arc<dyn KeyStore>,
    /// Query token source.
    pub credentials: Arc<dyn CredentialProvider>,
    /// Middlewares, post events and deferred continuations.
    pub router: Arc<dyn EventRouter>,
    /// Named application operations.
    pub operations: Arc<dyn OperationRegistry>,
    /// Transport factory.
    pub connector: Arc<dyn Connector>,
}

/// Connection state.
///
/// ```text
/// Disconnected -> Connecting -> HandshakePending -> Ready -> Disconnected
///                     ^                               |
///                     +-------- Reconnecting <--------+ (abnormal close)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// Transport requested, not open yet.
    Connecting,
    /// Transport open, waiting for the server's public key.
    HandshakePending,
    /// Transport secret established.
    Ready,
    /// Abnormal close; a reconnect is scheduled.
    Reconnecting,
}

/// Notifications for the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// Transport opened.
    Connected,
    /// Handshake completed; envelopes can flow.
    Ready,
    /// Transport closed abnormally; a reconnect is scheduled.
    Disconnected {
        /// Close code.
        code: u16,
    },
    /// Transport error.
    Error(String),
    /// Result pushed by a subscription.
    Next {
        /// Peer that ran the subscription.
        sender: String,
        /// Correlation id of the push.
        query_id: Option<String>,
        /// Operation output.
        body: Value,
    },
    /// Read receipt.
    Receipt {
        /// Peer that read the message.
        sender: Option<String>,
        /// Id of the message that was read.
        query_id: Option<String>,
        /// Receipt body (`{ "localTime": ... }`).
        body: Value,
    },
}

/// Per-send options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Seal the body for the receiver. Defaults to `true`; has no effect on
    /// control envelopes or envelopes addressed to `server`.
    pub encrypt: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self { encrypt: true }
    }
}

/// Current transport and the tasks tied to it.
#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    handle: Option<LinkHandle>,
    first_message: bool,
    reader: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    ping_timeout: Option<JoinHandle<()>>,
}

impl Slot {
    fn stop_tasks(&mut self) {
        for task in [
            self.reader.take(),
            self.watchdog.take(),
            self.reconnect.take(),
            self.ping_timeout.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

struct Shared {
    config: EngineConfig,
    keys: Arc<dyn KeyStore>,
    credentials: Arc<dyn CredentialProvider>,
    router: Arc<dyn EventRouter>,
    operations: Arc<dyn OperationRegistry>,
    connector: Arc<dyn Connector>,
    queries: PendingQueryTable,
    slot: Mutex<Slot>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SocketEvent>,
    last_seen: Mutex<Instant>,
    waiting_ping: AtomicBool,
    ping_query: Mutex<Option<String>>,
    last_connect: Mutex<Option<Instant>>,
}

/// Client-side secure socket engine.
///
/// # Example
///
/// ```no_run
/// # async fn run(collaborators: secsock_core::Collaborators) -> secsock_core::Result<()> {
/// use secsock_core::{Engine, EngineConfig};
/// use serde_json::json;
///
/// let engine = Engine::new(EngineConfig::with_url("wss://example.org/ws?token="), collaborators);
/// engine.connect(Some("query-token".into()));
///
/// let sum = engine.request("calculator", "sum", json!([1, 2])).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    /// Create an engine. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                config,
                keys: collaborators.keys,
                credentials: collaborators.credentials,
                router: collaborators.router,
                operations: collaborators.operations,
                connector: collaborators.connector,
                queries: PendingQueryTable::default(),
                slot: Mutex::new(Slot::default()),
                state,
                events,
                last_seen: Mutex::new(Instant::now()),
                waiting_ping: AtomicBool::new(false),
                ping_query: Mutex::new(None),
                last_connect: Mutex::new(None),
            }),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Subscribe to socket events.
    pub fn events(&self) -> broadcast::Receiver<SocketEvent> {
        self.shared.events.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Whether envelopes can be sent right now.
    pub fn ready(&self) -> bool {
        self.state() == ConnectionState::Ready && self.link_open()
    }

    /// Number of queries waiting for a reply.
    pub fn pending_queries(&self) -> usize {
        self.shared.queries.len()
    }

    /// Send an envelope and wait for the reply body.
    ///
    /// A missing `queryId` is generated. If the body needs the peer layer and
    /// no secret exists for the receiver yet, a key exchange goes out first
    /// and the envelope follows once the receiver answers it.
    ///
    /// There is no per-query timeout; wrap the call in
    /// `tokio::time::timeout` to bound it.
    ///
    /// # Errors
    ///
    /// - `Error::ReceiverMissing` if the envelope has no receiver
    /// - `Error::NotConnected` if no ready transport appears in time
    /// - `Error::KeyExchange` if the needed key exchange could not be sent
    /// - `Error::Rejected` with the remote's text if the query was rejected
    pub async fn send_message(&self, mut envelope: Envelope, options: SendOptions) -> Result<Value> {
        if envelope.receiver.as_deref().map_or(true, str::is_empty) {
            return Err(Error::ReceiverMissing);
        }
        self.ensure_ready().await?;

        let query_id = match envelope.query_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.shared.queries.fresh_id(),
        };
        envelope.query_id = Some(query_id.clone());

        let continuation = if envelope.is_control() {
            Continuation::Resolve
        } else {
            Continuation::Replay { attempts: 0 }
        };
        let (responder, reply) = oneshot::channel();
        self.submit(PendingQuery::new(envelope, options.encrypt, continuation).with_responder(responder))?;

        match reply.await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(reason)) => Err(Error::Rejected(reason)),
            Err(_) => Err(Error::Abandoned(query_id)),
        }
    }

    /// Ask `receiver` to run `process` with `body`.
    ///
    /// Outbound middlewares for `process` run first.
    ///
    /// # Errors
    ///
    /// - `Error::Blocked` if a middleware disallowed the operation
    /// - anything [`send_message`](Self::send_message) returns
    pub async fn request(&self, receiver: &str, process: &str, body: Value) -> Result<Value> {
        let invocation = Invocation {
            process: process.to_string(),
            sender: None,
            query_id: None,
            referer: self.shared.config.socket_url.clone(),
            payload: body.clone(),
        };
        if !self
            .shared
            .router
            .run_middlewares(process, &invocation, Phase::Outbound)
            .await
        {
            tracing::debug!(process, "Outbound middleware blocked request");
            return Err(Error::Blocked(process.to_string()));
        }

        self.send_message(
            Envelope::to(receiver, body).with_process(process),
            SendOptions::default(),
        )
        .await
    }

    /// Start a key exchange with `peer`.
    ///
    /// Returns once the `newKey` offer is sent; the secret exists once the
    /// peer's `importKey` answer arrives.
    pub async fn exchange_key(&self, peer: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.start_exchange(peer, None, None)
    }

    /// Tell `sender` that the message `query_id` was read.
    pub fn read_notify(&self, sender: &str, query_id: &str) -> Result<()> {
        let local_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        tracing::debug!(sender, query_id, "Sending read receipt");
        self.post(
            Envelope::read_receipt(sender, query_id.to_string(), local_time),
            true,
        )
    }

    fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    fn upgrade(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        lock(&self.shared.slot)
    }

    fn current_handle(&self) -> Option<LinkHandle> {
        self.slot().handle.clone()
    }

    fn link_open(&self) -> bool {
        self.current_handle().is_some_and(|handle| handle.is_open())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot().generation == generation
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, ?state, "Connection state changed");
        }
    }

    fn emit(&self, event: SocketEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }

    fn touch(&self) {
        *lock(&self.shared.last_seen) = Instant::now();
    }

    fn since_last_seen(&self) -> std::time::Duration {
        lock(&self.shared.last_seen).elapsed()
    }
}
