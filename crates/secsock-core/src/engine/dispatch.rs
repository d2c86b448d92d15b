//! Envelope dispatch.
//!
//! Outbound: file the query, add the peer layer when a secret exists (or
//! park the send behind a key exchange when it does not), seal under the
//! transport secret and transmit.
//!
//! Inbound: open the transport layer, route errors and control envelopes,
//! open the peer layer, then either run the named operation, register a
//! subscription, surface a `next` push, or resolve a pending query.

use super::{Engine, SocketEvent};
use crate::codec;
use crate::envelope::{Envelope, EnvelopeKind, SubscribeDirective, NEXT, SERVER, SUBSCRIBE};
use crate::query::{Continuation, PendingQuery};
use crate::transport::InboundFrame;
use crate::{Error, Result};
use futures_util::FutureExt;
use secsock_platform::{AfterHook, Invocation, Phase};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::sync::Arc;

impl Engine {
    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Send `query`, filing it if anything waits on its reply.
    ///
    /// On failure the query's caller is rejected and the error returned.
    pub(super) fn submit(&self, mut query: PendingQuery) -> Result<()> {
        let Some(receiver) = query.envelope.receiver.clone() else {
            query.reject(Error::ReceiverMissing.to_string());
            return Err(Error::ReceiverMissing);
        };

        if Self::needs_peer_layer(&query) && !self.shared.keys.has_secret(&receiver) {
            tracing::debug!(peer = %receiver, "No secret yet, exchanging keys first");
            return self.start_exchange(&receiver, None, Some(Box::new(query)));
        }

        let id = match query.query_id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = self.shared.queries.fresh_id();
                query.envelope.query_id = Some(id.clone());
                id
            }
        };

        let frame = match self.seal(&query, &receiver) {
            Ok(frame) => frame,
            Err(err) => {
                query.reject(err.to_string());
                return Err(err);
            }
        };

        let filed = query.responder.is_some() || !matches!(query.continuation, Continuation::Resolve);
        if filed {
            self.shared.queries.insert(id.clone(), query);
        }

        tracing::trace!(query_id = %id, peer = %receiver, "Sending envelope");
        if let Err(err) = self.transmit(frame) {
            if let Some(query) = self.shared.queries.take(&id) {
                query.reject(err.to_string());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Fire-and-forget send: replies, acknowledgements, notifications.
    pub(super) fn post(&self, envelope: Envelope, encrypt: bool) -> Result<()> {
        self.submit(PendingQuery::new(envelope, encrypt, Continuation::Resolve))
    }

    pub(super) fn transmit(&self, frame: Vec<u8>) -> Result<()> {
        self.current_handle().ok_or(Error::NotConnected)?.send(frame)
    }

    fn needs_peer_layer(query: &PendingQuery) -> bool {
        query.encrypt
            && !query.envelope.is_control()
            && query.envelope.receiver.as_deref() != Some(SERVER)
    }

    fn seal(&self, query: &PendingQuery, receiver: &str) -> Result<Vec<u8>> {
        let keys = self.shared.keys.as_ref();
        let envelope = if Self::needs_peer_layer(query) {
            let mut sealed = query.envelope.clone();
            sealed.body = codec::seal_body(keys, receiver, &sealed.body)?;
            Cow::Owned(sealed)
        } else {
            Cow::Borrowed(&query.envelope)
        };
        codec::seal_envelope(keys, &envelope)
    }

    // ------------------------------------------------------------------
    // Correlation
    // ------------------------------------------------------------------

    /// Act on the pending query matching `reply`, if any.
    pub(super) fn check_callback(&self, reply: &Envelope) {
        let Some(id) = reply.query_id.as_deref().filter(|id| !id.is_empty()) else {
            return;
        };
        let Some(mut query) = self.shared.queries.take(id) else {
            tracing::trace!(query_id = id, "No pending query for reply");
            return;
        };

        let kind = reply.kind();
        match std::mem::replace(&mut query.continuation, Continuation::Resolve) {
            Continuation::Resolve => query.resolve(reply.body.clone()),
            Continuation::Replay { attempts } => {
                query.continuation = Continuation::Replay { attempts };
                match kind {
                    // Peer answered an exchange: go again under a new id.
                    EnvelopeKind::KeyAck => self.replay(query, true),
                    // Peer renegotiated: same envelope, new secret.
                    EnvelopeKind::KeyOffer => self.replay(query, false),
                    _ => query.resolve(reply.body.clone()),
                }
            }
            Continuation::KeyOffer { parked } => {
                if let Some(parked) = parked {
                    self.replay(*parked, true);
                }
                query.resolve(reply.body.clone());
            }
            Continuation::Ping { salt } => {
                if self.shared.config.rotate_salt_on_ping {
                    if let Err(err) = self.shared.keys.set_secret_salt(SERVER, &salt) {
                        tracing::error!(%err, "Could not rotate transport salt");
                        query.reject(err.to_string());
                        return;
                    }
                }
                query.resolve(reply.body.clone());
            }
        }
    }

    fn replay(&self, mut query: PendingQuery, renew_id: bool) {
        let attempts = match query.continuation {
            Continuation::Replay { attempts } => attempts.saturating_add(1),
            _ => 1,
        };
        if attempts > self.shared.config.max_replays {
            tracing::warn!(query_id = ?query.query_id(), attempts, "Replay limit reached");
            let reason = format!("Gave up after {} replays", attempts - 1);
            query.reject(reason);
            return;
        }

        query.continuation = Continuation::Replay { attempts };
        if renew_id {
            query.envelope.query_id = Some(self.shared.queries.fresh_id());
        }
        tracing::debug!(query_id = ?query.query_id(), attempts, "Replaying query");
        if let Err(err) = self.submit(query) {
            tracing::error!(%err, "Replay failed");
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    pub(super) async fn handle_frame(&self, generation: u64, frame: InboundFrame) {
        let Some(bytes) = frame.into_bytes() else {
            tracing::error!("String messages are not supported");
            return;
        };
        self.touch();

        let first = self.take_first_message(generation);
        if first || !self.shared.keys.has_secret(SERVER) {
            self.handshake(generation, &bytes);
            return;
        }

        let envelope = match codec::open_envelope(self.shared.keys.as_ref(), &bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(%err, "Could not decrypt the message");
                Envelope::undecryptable()
            }
        };
        self.dispatch(envelope).await;
    }

    async fn dispatch(&self, mut envelope: Envelope) {
        tracing::trace!(query_id = ?envelope.query_id, sender = ?envelope.sender, "Received envelope");

        if let Some(error) = envelope.error.clone() {
            self.route_error(&envelope, &error);
            return;
        }

        match envelope.kind() {
            EnvelopeKind::KeyOffer => {
                self.generate_and_send_key(&envelope);
                self.check_callback(&envelope);
                return;
            }
            EnvelopeKind::KeyAck => {
                self.import_key(&envelope);
                self.check_callback(&envelope);
                return;
            }
            EnvelopeKind::ReadReceipt => {
                self.emit(SocketEvent::Receipt {
                    sender: envelope.sender.clone(),
                    query_id: envelope.query_id.clone(),
                    body: envelope.body.clone(),
                });
                self.check_callback(&envelope);
                return;
            }
            EnvelopeKind::Application { .. } => {}
        }

        let Some(sender) = envelope.sender.clone() else {
            self.check_callback(&envelope);
            return;
        };

        if envelope.query_id.is_some() && !self.shared.keys.has_secret(&sender) {
            tracing::warn!(%sender, "No key for sender, forcing key exchange");
            if let Err(err) = self.start_exchange(&sender, envelope.query_id.clone(), None) {
                tracing::error!(%err, "Could not exchange key");
            }
            return;
        }

        if sender != SERVER {
            match codec::open_body(self.shared.keys.as_ref(), &sender, &envelope.body) {
                Some(body) => envelope.body = body,
                None => tracing::debug!(%sender, "Body is not sealed, using it as is"),
            }
        }

        let Some(process) = envelope.process.clone() else {
            self.check_callback(&envelope);
            return;
        };

        let invocation = Invocation {
            process: process.clone(),
            sender: Some(sender.clone()),
            query_id: envelope.query_id.clone(),
            referer: self.shared.config.socket_url.clone(),
            payload: envelope.body.clone(),
        };
        if !self
            .shared
            .router
            .run_middlewares(&process, &invocation, Phase::Inbound)
            .await
        {
            tracing::debug!(%process, "Inbound middleware disallowed operation");
            self.report_error(&envelope, format!("Operation {} not found", process));
            return;
        }

        if process == NEXT {
            self.emit(SocketEvent::Next {
                sender,
                query_id: envelope.query_id,
                body: envelope.body,
            });
            return;
        }

        if process == SUBSCRIBE {
            if let Some(directive) = SubscribeDirective::parse(&envelope.body) {
                self.subscribe(&sender, envelope.query_id, directive);
                return;
            }
        }

        if !self.shared.operations.exists(&process) {
            tracing::debug!(%process, "Operation not found");
            self.report_error(&envelope, format!("Operation {} not found", process));
            return;
        }

        let engine = self.clone();
        let body = envelope.body;
        tokio::spawn(async move { engine.invoke(invocation, body).await });
    }

    /// An inbound envelope carried `error`.
    fn route_error(&self, envelope: &Envelope, error: &str) {
        tracing::error!(query_id = ?envelope.query_id, sender = ?envelope.sender, error, "Error in message");

        let Some(query_id) = envelope.query_id.as_deref().filter(|id| !id.is_empty()) else {
            return;
        };
        if let Some(query) = self.shared.queries.take(query_id) {
            query.reject(format!("Error: {}", error));
            return;
        }

        // Echo as a plain reply so the sender's own error path cannot loop.
        if let Some(sender) = envelope.sender.as_deref() {
            let echo = Envelope::reply(
                sender,
                Some(query_id.to_string()),
                json!({ "error": format!("Error: {}", error) }),
            );
            if let Err(err) = self.post(echo, true) {
                tracing::warn!(%err, "Could not echo error");
            }
        }
    }

    /// Answer `request` with an error envelope.
    fn report_error(&self, request: &Envelope, error: String) {
        let Some(sender) = request.sender.as_deref() else {
            return;
        };
        let failure = Envelope::failure(sender, request.query_id.clone(), error);
        if let Err(err) = self.post(failure, false) {
            tracing::warn!(%err, "Could not report error");
        }
    }

    async fn invoke(&self, invocation: Invocation, body: Value) {
        let process = invocation.process.clone();
        let sender = invocation.sender.clone().unwrap_or_default();
        tracing::debug!(%process, %sender, "Calling operation");

        match self.shared.operations.call(&process, &invocation, body).await {
            Ok(output) => {
                self.spawn_post_events(&process, output.clone(), None);
                self.spawn_post_events(&process, output.clone(), Some(sender.clone()));

                if let Some(output) = output {
                    let reply = Envelope::reply(&sender, invocation.query_id.clone(), output);
                    if let Err(err) = self.post(reply, true) {
                        tracing::warn!(%err, %process, "Could not send result");
                    }
                }
            }
            Err(err) => {
                tracing::error!(%err, %process, "callOperation error");
                let failure = Envelope::failure(
                    &sender,
                    invocation.query_id.clone(),
                    "callOperation error".into(),
                );
                if let Err(err) = self.post(failure, false) {
                    tracing::warn!(%err, "Could not report operation failure");
                }
            }
        }
    }

    fn spawn_post_events(&self, process: &str, output: Option<Value>, scope: Option<String>) {
        let router = Arc::clone(&self.shared.router);
        let process = process.to_string();
        tokio::spawn(async move {
            if let Err(err) = router
                .check_post_events(&process, output.as_ref(), scope.as_deref())
                .await
            {
                // The result was sent regardless.
                tracing::error!(%err, %process, ?scope, "Post events reported failure");
            }
        });
    }

    /// Register `directive` and acknowledge it.
    fn subscribe(&self, subscriber: &str, query_id: Option<String>, directive: SubscribeDirective) {
        let engine = self.downgrade();
        let target = subscriber.to_string();
        let call = directive.call.clone();
        let payload = directive.payload.clone();

        let hook: AfterHook = Arc::new(move || {
            let engine = engine.clone();
            let target = target.clone();
            let call = call.clone();
            let payload = payload.clone();
            async move {
                match Engine::upgrade(&engine) {
                    Some(engine) => engine.push_next(&target, &call, payload).await,
                    None => false,
                }
            }
            .boxed()
        });
        self.shared.router.set_after(&directive.after, hook, subscriber);
        tracing::debug!(subscriber, call = %directive.call, after = %directive.after, "Subscribe completed");

        let ack = Envelope::reply(
            subscriber,
            query_id,
            json!({ "process": format!("subscribe {}", directive.call), "status": true }),
        );
        if let Err(err) = self.post(ack, true) {
            tracing::warn!(%err, "Could not acknowledge subscription");
        }
    }

    /// Run a subscribed operation and push its output as `next`.
    async fn push_next(&self, subscriber: &str, call: &str, payload: Value) -> bool {
        let invocation = Invocation {
            process: call.to_string(),
            sender: Some(subscriber.to_string()),
            query_id: None,
            referer: self.shared.config.socket_url.clone(),
            payload: payload.clone(),
        };

        let output = match self.shared.operations.call(call, &invocation, payload).await {
            Ok(output) => output.unwrap_or(Value::Null),
            Err(err) => {
                tracing::error!(%err, call, subscriber, "Subscribed operation failed");
                return false;
            }
        };

        let next = Envelope::to(subscriber, output).with_process(NEXT);
        match self.post(next, true) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, subscriber, "Could not push next");
                false
            }
        }
    }
}
