//! Pending query table.
//!
//! Every outbound request that expects a reply is filed here under its
//! `queryId` together with what to do when the reply arrives. An entry is
//! removed before it is acted on, so a second reply with the same id finds
//! nothing.

use crate::envelope::Envelope;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Length of generated query ids.
pub const QUERY_ID_LEN: usize = 16;

/// Where a caller waits for its reply. `Err` carries the rejection text.
pub(crate) type Responder = oneshot::Sender<core::result::Result<Value, String>>;

/// What a reply to a pending query triggers.
#[derive(Debug)]
pub(crate) enum Continuation {
    /// Hand the reply body to the caller.
    Resolve,
    /// Application send. Key-exchange replies make it go out again;
    /// `attempts` counts how often that already happened.
    Replay { attempts: u8 },
    /// A `newKey` offer. `parked` is the send that needed the exchange.
    KeyOffer { parked: Option<Box<PendingQuery>> },
    /// Keepalive ping carrying `salt`.
    Ping { salt: Vec<u8> },
}

/// An outbound request, filed or about to be.
#[derive(Debug)]
pub(crate) struct PendingQuery {
    /// The envelope as the caller built it, with a plaintext body.
    pub envelope: Envelope,
    /// Whether the body gets the peer layer.
    pub encrypt: bool,
    pub continuation: Continuation,
    pub responder: Option<Responder>,
}

impl PendingQuery {
    pub fn new(envelope: Envelope, encrypt: bool, continuation: Continuation) -> Self {
        Self {
            envelope,
            encrypt,
            continuation,
            responder: None,
        }
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn query_id(&self) -> Option<&str> {
        self.envelope.query_id.as_deref()
    }

    pub fn resolve(self, body: Value) {
        if let Some(responder) = self.responder {
            // The caller may have stopped waiting.
            let _ = responder.send(Ok(body));
        }
    }

    /// Fail the caller. A rejected key offer fails its parked send too.
    pub fn reject(self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Continuation::KeyOffer {
            parked: Some(parked),
        } = self.continuation
        {
            parked.reject(reason.clone());
        }
        if let Some(responder) = self.responder {
            let _ = responder.send(Err(reason));
        }
    }
}

/// Outstanding queries keyed by `queryId`.
#[derive(Debug, Default)]
pub(crate) struct PendingQueryTable {
    entries: Mutex<HashMap<String, PendingQuery>>,
}

impl PendingQueryTable {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingQuery>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// File `query` under `id`, replacing any live entry with the same id.
    ///
    /// A replaced entry is dropped, which its caller observes as abandoned.
    pub fn insert(&self, id: String, query: PendingQuery) {
        if self.entries().insert(id.clone(), query).is_some() {
            tracing::debug!(query_id = %id, "Replaced pending query");
        }
    }

    /// Remove and return the entry for `id`.
    pub fn take(&self, id: &str) -> Option<PendingQuery> {
        self.entries().remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// A random id not used by any pending query.
    pub fn fresh_id(&self) -> String {
        let entries = self.entries();
        loop {
            let id = random_id();
            if !entries.contains_key(&id) {
                return id;
            }
        }
    }
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(QUERY_ID_LEN)
        .map(char::from)
        .collect()
}
