//! Per-peer key exchange.
//!
//! ```text
//! A                                   B
//! |-- newKey(qid, A's public key) --->|  B imports, keeps or makes its pair
//! |<-- importKey(qid, B's key) -------|
//! |   A imports; the send parked on qid goes out again
//! ```
//!
//! Both control envelopes carry the raw public key as base64 and skip the
//! peer layer; the transport layer still applies.

use super::Engine;
use crate::codec;
use crate::envelope::Envelope;
use crate::query::{Continuation, PendingQuery};
use crate::{Error, Result};
use secsock_crypto::encoding::{decode_base64, encode_base64};
use serde_json::Value;

impl Engine {
    /// Send a `newKey` offer to `peer` and file it under `query_id` (or a
    /// fresh id). `parked` is resubmitted when the answer arrives.
    ///
    /// If the offer cannot be sent, `parked` is rejected with the reason.
    pub(super) fn start_exchange(
        &self,
        peer: &str,
        query_id: Option<String>,
        parked: Option<Box<PendingQuery>>,
    ) -> Result<()> {
        tracing::debug!(peer, ?query_id, "Starting key exchange");

        let public_key = match self.offer_key(peer) {
            Ok(public_key) => public_key,
            Err(err) => return Err(Self::exchange_failed(peer, err, parked)),
        };
        let id = query_id.unwrap_or_else(|| self.shared.queries.fresh_id());
        let offer = Envelope::key_offer(peer, id.clone(), public_key);

        let frame = match codec::seal_envelope(self.shared.keys.as_ref(), &offer) {
            Ok(frame) => frame,
            Err(err) => return Err(Self::exchange_failed(peer, err, parked)),
        };
        self.shared.queries.insert(
            id.clone(),
            PendingQuery::new(offer, false, Continuation::KeyOffer { parked }),
        );

        if let Err(err) = self.transmit(frame) {
            let parked = match self.shared.queries.take(&id) {
                Some(PendingQuery {
                    continuation: Continuation::KeyOffer { parked },
                    ..
                }) => parked,
                _ => None,
            };
            return Err(Self::exchange_failed(peer, err, parked));
        }
        Ok(())
    }

    /// Answer an inbound `newKey` offer with `importKey`.
    pub(super) fn generate_and_send_key(&self, offer: &Envelope) {
        let (Some(sender), Some(query_id)) = (offer.sender.as_deref(), offer.query_id.as_deref()) else {
            tracing::warn!("Key offer without sender or queryId");
            return;
        };

        let public_key = match self.accept_key(sender, &offer.body) {
            Ok(public_key) => public_key,
            Err(err) => {
                tracing::error!(%err, sender, "Could not accept key offer");
                return;
            }
        };

        // Not filed: the caller's own query under this id must survive.
        let ack = Envelope::key_ack(sender, query_id.to_string(), public_key);
        if let Err(err) = self.post(ack, false) {
            tracing::error!(%err, sender, "Could not answer key offer");
        }
    }

    /// Complete the secret with the key from an inbound `importKey`.
    pub(super) fn import_key(&self, ack: &Envelope) {
        let (Some(sender), Some(_)) = (ack.sender.as_deref(), ack.query_id.as_deref()) else {
            tracing::warn!("Key answer without sender or queryId");
            return;
        };
        tracing::debug!(sender, "Importing key");

        let imported = Self::public_key_from(sender, &ack.body)
            .and_then(|key| {
                self.shared
                    .keys
                    .import_public_key(&key, sender)
                    .map_err(Error::from)
            });
        if let Err(err) = imported {
            tracing::error!(%err, sender, "Could not import key");
        }
    }

    fn offer_key(&self, peer: &str) -> Result<String> {
        self.shared.keys.generate_key(peer)?;
        let public_key = self.shared.keys.export_key(peer)?;
        Ok(encode_base64(&public_key))
    }

    fn accept_key(&self, peer: &str, body: &Value) -> Result<String> {
        let key = Self::public_key_from(peer, body)?;
        let keys = &self.shared.keys;
        if !keys.has_key_pair(peer) {
            keys.generate_key(peer)?;
        }
        keys.import_public_key(&key, peer)?;
        Ok(encode_base64(&keys.export_key(peer)?))
    }

    fn public_key_from(peer: &str, body: &Value) -> Result<Vec<u8>> {
        let text = body.as_str().ok_or_else(|| Error::KeyExchange {
            peer: peer.to_string(),
            reason: "public key is not a string".into(),
        })?;
        Ok(decode_base64(text)?)
    }

    fn exchange_failed(peer: &str, err: Error, parked: Option<Box<PendingQuery>>) -> Error {
        let error = Error::KeyExchange {
            peer: peer.to_string(),
            reason: err.to_string(),
        };
        tracing::error!(%error, "Key exchange failed");
        if let Some(parked) = parked {
            parked.reject(error.to_string());
        }
        error
    }
}
