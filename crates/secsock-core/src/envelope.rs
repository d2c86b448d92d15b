//! Envelope data model.
//!
//! An envelope is the unit of traffic after the transport handshake. On the
//! wire it is a JSON object:
//!
//! ```text
//! { "receiver": "bob", "sender": "alice", "queryId": "...", "process": "echo",
//!   "workerProcess": { "newKey": true }, "error": "...", "body": ... }
//! ```
//!
//! `workerProcess` flags mark protocol-control envelopes. They never reach
//! application code and never wait for a peer secret.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Reserved identity of the server holding the transport-level secret.
pub const SERVER: &str = "server";
/// Process name of a subscription request.
pub const SUBSCRIBE: &str = "subscribe";
/// Process name of a pushed subscription result.
pub const NEXT: &str = "next";
/// Process name of the keepalive ping.
pub const PING: &str = "ping";

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Protocol-control flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerProcess {
    /// Carries the sender's public key and asks for the receiver's.
    #[serde(default, skip_serializing_if = "is_false")]
    pub new_key: bool,
    /// Carries the receiver's public key in answer to `new_key`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub import_key: bool,
    /// Read receipt.
    #[serde(default, skip_serializing_if = "is_false")]
    pub message_received: bool,
}

/// Protocol message envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Destination identity (required on send).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Origin identity (set by the server on delivery).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    /// Named operation, `subscribe` or `next`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    /// Control flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_process: Option<WorkerProcess>,
    /// Failure text; present only on error envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Payload: plaintext before sealing and after opening.
    #[serde(default)]
    pub body: Value,
}

/// What an envelope is for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeKind<'a> {
    /// `newKey`: the sender offers its public key.
    KeyOffer,
    /// `importKey`: the sender answers an offer with its public key.
    KeyAck,
    /// `messageReceived`: read receipt.
    ReadReceipt,
    /// Application payload, optionally naming an operation.
    Application {
        /// Requested operation.
        process: Option<&'a str>,
        /// Payload.
        body: &'a Value,
    },
}

impl EnvelopeKind<'_> {
    /// Whether this is a protocol-control kind.
    pub fn is_control(&self) -> bool {
        !matches!(self, EnvelopeKind::Application { .. })
    }
}

impl Envelope {
    /// Application envelope addressed to `receiver`.
    pub fn to(receiver: impl Into<String>, body: Value) -> Self {
        Self {
            receiver: Some(receiver.into()),
            body,
            ..Self::default()
        }
    }

    /// Name the operation to invoke.
    pub fn with_process(mut self, process: impl Into<String>) -> Self {
        self.process = Some(process.into());
        self
    }

    /// Set the correlation id.
    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    /// Classify the envelope. Flags are checked in `newKey`, `importKey`,
    /// `messageReceived` order.
    pub fn kind(&self) -> EnvelopeKind<'_> {
        match &self.worker_process {
            Some(flags) if flags.new_key => EnvelopeKind::KeyOffer,
            Some(flags) if flags.import_key => EnvelopeKind::KeyAck,
            Some(flags) if flags.message_received => EnvelopeKind::ReadReceipt,
            _ => EnvelopeKind::Application {
                process: self.process.as_deref(),
                body: &self.body,
            },
        }
    }

    /// Whether this is a protocol-control envelope.
    pub fn is_control(&self) -> bool {
        self.kind().is_control()
    }

    pub(crate) fn key_offer(peer: &str, query_id: String, public_key: String) -> Self {
        Self {
            receiver: Some(peer.to_string()),
            query_id: Some(query_id),
            worker_process: Some(WorkerProcess {
                new_key: true,
                ..WorkerProcess::default()
            }),
            body: Value::String(public_key),
            ..Self::default()
        }
    }

    pub(crate) fn key_ack(peer: &str, query_id: String, public_key: String) -> Self {
        Self {
            receiver: Some(peer.to_string()),
            query_id: Some(query_id),
            worker_process: Some(WorkerProcess {
                import_key: true,
                ..WorkerProcess::default()
            }),
            body: Value::String(public_key),
            ..Self::default()
        }
    }

    pub(crate) fn read_receipt(peer: &str, query_id: String, local_time_ms: u64) -> Self {
        Self {
            receiver: Some(peer.to_string()),
            query_id: Some(query_id),
            worker_process: Some(WorkerProcess {
                message_received: true,
                ..WorkerProcess::default()
            }),
            body: json!({ "localTime": local_time_ms }),
            ..Self::default()
        }
    }

    pub(crate) fn ping(salt: String) -> Self {
        Self::to(SERVER, Value::String(salt)).with_process(PING)
    }

    /// Reply to a request, carrying its correlation id.
    pub(crate) fn reply(peer: &str, query_id: Option<String>, body: Value) -> Self {
        Self {
            receiver: Some(peer.to_string()),
            query_id,
            body,
            ..Self::default()
        }
    }

    pub(crate) fn failure(peer: &str, query_id: Option<String>, error: String) -> Self {
        Self {
            receiver: Some(peer.to_string()),
            query_id,
            error: Some(error),
            ..Self::default()
        }
    }

    /// Stand-in for a frame that could not be opened.
    pub(crate) fn undecryptable() -> Self {
        Self {
            error: Some("Could not decrypt the message".into()),
            body: Value::String(String::new()),
            query_id: Some(String::new()),
            ..Self::default()
        }
    }
}

/// Body of a `subscribe` request: run `call` with `payload` whenever `after`
/// fires, pushing each result back as `next`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeDirective {
    /// Operation to run.
    pub call: String,
    /// Event that triggers it.
    pub after: String,
    /// Body handed to the operation.
    #[serde(default)]
    pub payload: Value,
}

impl SubscribeDirective {
    /// Extract a directive from a request body.
    pub fn parse(body: &Value) -> Option<Self> {
        let directive: Self = serde_json::from_value(body.clone()).ok()?;
        if directive.call.is_empty() || directive.after.is_empty() {
            return None;
        }
        Some(directive)
    }
}
