//! Peer-to-peer tests through a relay: lazy key exchange, replay of the
//! parked request, forced exchange and the peer layer.

mod common;

use common::{test_config, wait_until, within, Harness, Relay};
use secsock_core::envelope::{Envelope, SERVER};
use secsock_core::{EngineConfig, Error, EnvelopeKind, SocketEvent};
use secsock_platform::KeyStore;
use serde_json::{json, Value};
use std::time::Duration;

async fn join(relay: &Relay, name: &str, config: EngineConfig) -> Harness {
    let mut harness = Harness::new(config);
    let side = harness.connect_ready().await;
    relay.attach(name, side);
    harness
}

fn register_greet(bob: &Harness) {
    bob.operations.register("greet", |ctx, body| {
        let name = body["name"].as_str().unwrap_or("stranger");
        let from = ctx.sender.clone().unwrap_or_default();
        Ok(Some(json!(format!("hello {} (via {})", name, from))))
    });
}

#[tokio::test]
async fn test_first_contact_exchanges_keys_then_delivers() {
    let relay = Relay::new();
    let alice = join(&relay, "alice", test_config()).await;
    let bob = join(&relay, "bob", test_config()).await;
    register_greet(&bob);

    let result = within(
        "greeting",
        alice.engine.request("bob", "greet", json!({ "name": "alice" })),
    )
    .await
    .expect("request resolves");
    assert_eq!(result, json!("hello alice (via alice)"));

    let sent = relay.between("alice", "bob");
    assert!(
        matches!(sent[0].kind(), EnvelopeKind::KeyOffer),
        "first envelope to a new peer is a key offer"
    );

    let answers = relay.between("bob", "alice");
    assert!(matches!(answers[0].kind(), EnvelopeKind::KeyAck));
    assert_eq!(answers[0].query_id, sent[0].query_id);

    // The request went out once, sealed, under a new id.
    let requests: Vec<_> = sent
        .iter()
        .filter(|envelope| envelope.process.as_deref() == Some("greet"))
        .collect();
    assert_eq!(requests.len(), 1);
    assert_ne!(requests[0].query_id, sent[0].query_id);
    let sealed = requests[0].body.as_str().expect("sealed body is text");
    assert!(!sealed.contains("alice"));

    assert!(alice.keys.has_secret("bob"));
    assert!(bob.keys.has_secret("alice"));
}

#[tokio::test]
async fn test_established_secret_skips_exchange() {
    let relay = Relay::new();
    let alice = join(&relay, "alice", test_config()).await;
    let bob = join(&relay, "bob", test_config()).await;
    register_greet(&bob);

    for name in ["one", "two", "three"] {
        within(
            "greeting",
            alice.engine.request("bob", "greet", json!({ "name": name })),
        )
        .await
        .expect("request resolves");
    }

    let offers = relay
        .between("alice", "bob")
        .into_iter()
        .filter(|envelope| envelope.kind() == EnvelopeKind::KeyOffer)
        .count();
    assert_eq!(offers, 1);
}

#[tokio::test]
async fn test_structured_body_survives_peer_layer() {
    let relay = Relay::new();
    let alice = join(&relay, "alice", test_config()).await;
    let bob = join(&relay, "bob", test_config()).await;
    bob.operations.register("echo", |_ctx, body| Ok(Some(body)));

    let body = json!({
        "text": "über",
        "list": [1, 2.5, null, true],
        "nested": { "deep": { "deeper": "yes" } }
    });
    let result = within("echo", alice.engine.request("bob", "echo", body.clone()))
        .await
        .expect("request resolves");
    assert_eq!(result, body);
}

#[tokio::test]
async fn test_receiver_without_secret_forces_exchange() {
    let relay = Relay::new();
    let alice = join(&relay, "alice", test_config()).await;
    let bob = join(&relay, "bob", test_config()).await;
    register_greet(&bob);

    within("first", alice.engine.request("bob", "greet", json!({ "name": "a" })))
        .await
        .expect("first request");

    // Bob loses the secret; his next inbound request from alice cannot be read.
    bob.keys.forget("alice");

    let result = within(
        "second",
        alice.engine.request("bob", "greet", json!({ "name": "b" })),
    )
    .await
    .expect("second request resolves after renegotiation");
    assert_eq!(result, json!("hello b (via alice)"));

    // Bob's offer reused the id of the request he could not read.
    let bob_offer = relay
        .between("bob", "alice")
        .into_iter()
        .find(|envelope| envelope.kind() == EnvelopeKind::KeyOffer)
        .expect("bob offered a key");
    let unreadable = relay
        .between("alice", "bob")
        .into_iter()
        .filter(|envelope| envelope.process.as_deref() == Some("greet"))
        .nth(1)
        .expect("second request");
    assert_eq!(bob_offer.query_id, unreadable.query_id);
}

#[tokio::test]
async fn test_concurrent_first_sends_all_resolve() {
    let relay = Relay::new();
    let alice = join(&relay, "alice", test_config()).await;
    let bob = join(&relay, "bob", test_config()).await;
    bob.operations.register("echo", |_ctx, body| Ok(Some(body)));

    let requests: Vec<_> = (0..4)
        .map(|i| {
            let engine = alice.engine.clone();
            tokio::spawn(async move { engine.request("bob", "echo", json!(i)).await })
        })
        .collect();

    for (i, request) in requests.into_iter().enumerate() {
        let body = within("echo", request).await.unwrap().expect("resolves");
        assert_eq!(body, json!(i));
    }
}

#[tokio::test]
async fn test_replay_limit_rejects_caller() {
    let relay = Relay::new();
    let alice = join(
        &relay,
        "alice",
        EngineConfig {
            max_replays: 0,
            ..test_config()
        },
    )
    .await;
    let bob = join(&relay, "bob", test_config()).await;
    register_greet(&bob);

    let result = within(
        "rejection",
        alice.engine.request("bob", "greet", json!({ "name": "x" })),
    )
    .await;
    match result {
        Err(Error::Rejected(reason)) => assert!(reason.contains("replays"), "{}", reason),
        other => panic!("Expected replay rejection, got {:?}", other),
    }
    assert!(bob.operations.calls().is_empty());
}

#[tokio::test]
async fn test_explicit_exchange_key() {
    let relay = Relay::new();
    let alice = join(&relay, "alice", test_config()).await;
    let bob = join(&relay, "bob", test_config()).await;

    alice.engine.exchange_key("bob").await.expect("offer sent");

    let (a, b) = (alice.keys.clone(), bob.keys.clone());
    wait_until("secrets on both sides", move || {
        a.has_secret("bob") && b.has_secret("alice")
    })
    .await;
    let a = alice.engine.clone();
    wait_until("offer settled", move || a.pending_queries() == 0).await;
}

#[tokio::test]
async fn test_unreachable_peer_stays_pending() {
    let relay = Relay::new();
    let alice = join(&relay, "alice", test_config()).await;

    let engine = alice.engine.clone();
    let request = tokio::spawn(async move { engine.request("carol", "greet", Value::Null).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!request.is_finished());
    assert_eq!(alice.engine.pending_queries(), 1);
    assert!(relay
        .between("alice", "carol")
        .iter()
        .all(|envelope| envelope.kind() == EnvelopeKind::KeyOffer));
    request.abort();
}

#[tokio::test]
async fn test_error_reply_to_offer_rejects_parked_request() {
    let mut alice = Harness::new(test_config());
    let mut side = alice.connect_ready().await;

    let engine = alice.engine.clone();
    let request = tokio::spawn(async move { engine.request("carol", "greet", Value::Null).await });

    let offer = side.recv_skipping_pings().await;
    assert_eq!(offer.kind(), EnvelopeKind::KeyOffer);
    assert_eq!(offer.receiver.as_deref(), Some("carol"));
    side.send(&Envelope {
        sender: Some(SERVER.into()),
        query_id: offer.query_id.clone(),
        error: Some("Receiver carol not found".into()),
        ..Envelope::default()
    });

    match within("rejection", request).await.unwrap() {
        Err(Error::Rejected(reason)) => assert_eq!(reason, "Error: Receiver carol not found"),
        other => panic!("Expected rejection, got {:?}", other),
    }
    assert_eq!(alice.engine.pending_queries(), 0);
}

#[tokio::test]
async fn test_subscription_between_peers() {
    let relay = Relay::new();
    let alice = join(&relay, "alice", test_config()).await;
    let bob = join(&relay, "bob", test_config()).await;
    bob.operations
        .register("report", |_ctx, body| Ok(Some(json!({ "seen": body }))));
    let mut events = alice.engine.events();

    let ack = within(
        "subscribe ack",
        alice.engine.request(
            "bob",
            "subscribe",
            json!({ "call": "report", "after": "tick", "payload": "p" }),
        ),
    )
    .await
    .expect("subscribed");
    assert_eq!(ack, json!({ "process": "subscribe report", "status": true }));
    assert_eq!(bob.router.hook_scopes("tick"), vec!["alice".to_string()]);

    bob.router.fire("tick").await;

    let next = within("next", async {
        loop {
            if let Ok(event @ SocketEvent::Next { .. }) = events.recv().await {
                return event;
            }
        }
    })
    .await;
    match next {
        SocketEvent::Next { sender, body, .. } => {
            assert_eq!(sender, "bob");
            assert_eq!(body, json!({ "seen": "p" }));
        }
        other => panic!("Expected next, got {:?}", other),
    }
}
