//! Envelope sealing.
//!
//! Two layers:
//! - Peer layer: the body of an envelope addressed to a peer other than
//!   `server` is replaced by `base64(iv || AES-GCM(JSON(body)))` under the
//!   secret shared with that peer.
//! - Transport layer: the whole envelope is serialized to JSON and sealed
//!   under the `server` secret. The frame on the wire is `iv || ciphertext`,
//!   with no length prefix.

use crate::envelope::{Envelope, SERVER};
use crate::Result;
use secsock_crypto::encoding::{decode_base64, encode_base64};
use secsock_platform::KeyStore;
use serde_json::Value;

/// Serialize and seal an envelope under the transport secret.
pub fn seal_envelope(keys: &dyn KeyStore, envelope: &Envelope) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(envelope)?;
    Ok(keys.encrypt(&json, SERVER)?.to_bytes())
}

/// Open a transport frame and parse the envelope inside.
pub fn open_envelope(keys: &dyn KeyStore, frame: &[u8]) -> Result<Envelope> {
    let json = keys.decrypt(frame, SERVER)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Seal a body for `peer`, producing the base64 text that replaces it.
pub fn seal_body(keys: &dyn KeyStore, peer: &str, body: &Value) -> Result<Value> {
    let json = serde_json::to_vec(body)?;
    let sealed = keys.encrypt(&json, peer)?;
    Ok(Value::String(encode_base64(&sealed.to_bytes())))
}

/// Open a body sealed by `peer`.
///
/// Returns `None` when the body is not a sealed body from `peer`; callers
/// treat that as plaintext.
pub fn open_body(keys: &dyn KeyStore, peer: &str, body: &Value) -> Option<Value> {
    let text = body.as_str()?;
    let sealed = decode_base64(text).ok()?;
    let plaintext = keys.decrypt(&sealed, peer).ok()?;

    match serde_json::from_slice(&plaintext) {
        Ok(value) => Some(value),
        Err(_) => String::from_utf8(plaintext).ok().map(Value::String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secsock_platform::Keyring;
    use serde_json::json;

    fn pair(a: &str, b: &str) -> (Keyring, Keyring) {
        let left = Keyring::new();
        let right = Keyring::new();
        left.generate_key(b).unwrap();
        right.generate_key(a).unwrap();
        left.import_public_key(&right.export_key(a).unwrap(), b)
            .unwrap();
        right
            .import_public_key(&left.export_key(b).unwrap(), a)
            .unwrap();
        (left, right)
    }

    #[test]
    fn test_body_roundtrip_structured() {
        let (alice, bob) = pair("alice", "bob");
        let body = json!({ "text": "hi", "n": [1, 2, 3], "nested": { "ok": true } });

        let sealed = seal_body(&alice, "bob", &body).unwrap();
        assert!(sealed.is_string());
        assert!(!sealed.as_str().unwrap().contains("hi"));

        assert_eq!(open_body(&bob, "alice", &sealed), Some(body));
    }

    #[test]
    fn test_open_body_plaintext_fallback() {
        let (_alice, bob) = pair("alice", "bob");
        assert_eq!(open_body(&bob, "alice", &json!({ "plain": 1 })), None);
        assert_eq!(open_body(&bob, "alice", &json!("not sealed")), None);
    }

    #[test]
    fn test_envelope_roundtrip_under_transport_secret() {
        let (client, server) = pair(SERVER, SERVER);
        let envelope = Envelope::to("bob", json!("cipher")).with_query_id("q1");

        let frame = seal_envelope(&client, &envelope).unwrap();
        // iv(12) + tag(16) at minimum
        assert!(frame.len() > 28);

        let opened = open_envelope(&server, &frame).unwrap();
        assert_eq!(opened, envelope);
    }

    #[test]
    fn test_open_envelope_rejects_tampering() {
        let (client, server) = pair(SERVER, SERVER);
        let mut frame = seal_envelope(&client, &Envelope::to("bob", json!(1))).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        assert!(open_envelope(&server, &frame).is_err());
    }
}
