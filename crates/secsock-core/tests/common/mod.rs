//! Test harness for the protocol engine.
//!
//! Provides:
//! - `MockConnector`: records URLs and hands each `LinkDriver` to the test
//! - `ServerSide`: the server's end of one transport (handshake, sealed frames)
//! - `Relay`: a server routing envelopes between several engines
//! - `Harness`: an engine wired to mocks, plus its connector

#![allow(dead_code)]

use secsock_core::envelope::{Envelope, PING, SERVER};
use secsock_core::{
    codec, Collaborators, Connector, Engine, EngineConfig, InboundFrame, Link, LinkCommand, LinkDriver,
};
use secsock_platform::mock::{MockCredentials, MockEventRouter, MockOperations};
use secsock_platform::{KeyStore, Keyring};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default timeout for test operations.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity the simulated server keys its end of a transport under.
///
/// `codec` seals and opens under `server` on both ends of the link.
pub const TRANSPORT_PEER: &str = SERVER;

/// Socket URL prefix used by every harness.
pub const SOCKET_URL: &str = "ws://relay.test/socket?token=";

/// Await `future`, failing the test after `TEST_TIMEOUT`.
pub async fn within<F: Future>(what: &str, future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {}", what))
}

/// Poll `condition` until it holds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    within(what, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Config with short timings for tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        socket_url: Some(SOCKET_URL.into()),
        throttle_ms: 0,
        reconnect_delay_ms: 20,
        ping_interval_ms: 60_000,
        freshness_ms: 5000,
        ping_timeout_ms: 10_000,
        ready_timeout_ms: 2000,
        ..EngineConfig::default()
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Connector that hands every link's driver to the test.
pub struct MockConnector {
    urls: Mutex<Vec<String>>,
    drivers: mpsc::UnboundedSender<LinkDriver>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LinkDriver>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            urls: Mutex::new(Vec::new()),
            drivers: tx,
        });
        (connector, rx)
    }

    /// Number of transports opened.
    pub fn opened(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    /// URLs opened, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn open(&self, url: &str) -> Link {
        self.urls.lock().unwrap().push(url.to_string());
        let (link, driver) = secsock_core::transport::link();
        let _ = self.drivers.send(driver);
        link
    }
}

// ============================================================================
// Server side of one transport
// ============================================================================

/// The server's end of one transport.
pub struct ServerSide {
    pub driver: LinkDriver,
    pub keys: Arc<Keyring>,
}

impl ServerSide {
    /// Open the transport and complete the handshake.
    pub async fn accept(driver: LinkDriver) -> Self {
        let keys = Arc::new(Keyring::new());
        keys.generate_key(TRANSPORT_PEER).expect("server key");

        let mut side = Self { driver, keys };
        side.driver.events.opened();
        side.driver.events.deliver(InboundFrame::Binary(
            side.keys.export_key(TRANSPORT_PEER).expect("export server key"),
        ));

        match side.next_command().await {
            LinkCommand::Send(client_key) => {
                assert_eq!(client_key.len(), 32, "handshake answer is a raw public key");
                side.keys
                    .import_public_key(&client_key, TRANSPORT_PEER)
                    .expect("import client key");
            }
            other => panic!("Expected handshake answer, got {:?}", other),
        }
        side
    }

    /// Next command from the engine.
    pub async fn next_command(&mut self) -> LinkCommand {
        within("link command", self.driver.commands.recv())
            .await
            .expect("link dropped")
    }

    /// Next envelope from the engine, opened under the transport secret.
    pub async fn recv(&mut self) -> Envelope {
        match self.next_command().await {
            LinkCommand::Send(frame) => self.open(&frame),
            other => panic!("Expected envelope, got {:?}", other),
        }
    }

    /// Next envelope that is not a ping.
    pub async fn recv_skipping_pings(&mut self) -> Envelope {
        loop {
            let envelope = self.recv().await;
            if envelope.process.as_deref() != Some(PING) {
                return envelope;
            }
        }
    }

    pub fn open(&self, frame: &[u8]) -> Envelope {
        codec::open_envelope(self.keys.as_ref(), frame).expect("open envelope")
    }

    /// Seal `envelope` under the transport secret and deliver it.
    pub fn send(&self, envelope: &Envelope) {
        let frame = codec::seal_envelope(self.keys.as_ref(), envelope).expect("seal envelope");
        self.driver.events.deliver(InboundFrame::Binary(frame));
    }

    /// Reply from `server` to `request`.
    pub fn reply(&self, request: &Envelope, body: serde_json::Value) {
        self.send(&Envelope {
            sender: Some(SERVER.into()),
            query_id: request.query_id.clone(),
            body,
            ..Envelope::default()
        });
    }

    /// Close from the server side.
    pub fn close(&self, code: u16) {
        self.driver.events.closed(code);
    }
}

// ============================================================================
// Relay
// ============================================================================

struct Route {
    events: secsock_core::LinkEvents,
    keys: Arc<Keyring>,
}

/// Server that routes envelopes between engines by `receiver`, stamping
/// `sender`, and answers pings.
#[derive(Clone, Default)]
pub struct Relay {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    log: Arc<Mutex<Vec<(String, Envelope)>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route envelopes for `name` over `side`.
    pub fn attach(&self, name: &str, side: ServerSide) {
        let ServerSide { mut driver, keys } = side;
        self.routes.lock().unwrap().insert(
            name.to_string(),
            Route {
                events: driver.events.clone(),
                keys: Arc::clone(&keys),
            },
        );

        let relay = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            while let Some(command) = driver.commands.recv().await {
                match command {
                    LinkCommand::Send(frame) => {
                        let envelope = codec::open_envelope(keys.as_ref(), &frame).expect("relay open");
                        relay.route(&name, envelope);
                    }
                    LinkCommand::Close(code) => {
                        driver.events.closed(code);
                        break;
                    }
                }
            }
        });
    }

    fn route(&self, from: &str, mut envelope: Envelope) {
        self.log.lock().unwrap().push((from.to_string(), envelope.clone()));
        let receiver = envelope.receiver.clone().unwrap_or_default();

        let routes = self.routes.lock().unwrap();
        if receiver == SERVER {
            if envelope.process.as_deref() == Some(PING) {
                if let Some(route) = routes.get(from) {
                    let pong = Envelope {
                        sender: Some(SERVER.into()),
                        query_id: envelope.query_id,
                        body: serde_json::json!("pong"),
                        ..Envelope::default()
                    };
                    deliver(route, &pong);
                }
            }
            return;
        }

        envelope.sender = Some(from.to_string());
        envelope.receiver = Some(receiver.clone());
        if let Some(route) = routes.get(&receiver) {
            deliver(route, &envelope);
        }
    }

    /// Envelopes seen so far as `(sender, envelope)`.
    pub fn log(&self) -> Vec<(String, Envelope)> {
        self.log.lock().unwrap().clone()
    }

    /// Envelopes `from` addressed to `to`.
    pub fn between(&self, from: &str, to: &str) -> Vec<Envelope> {
        self.log()
            .into_iter()
            .filter(|(sender, envelope)| sender == from && envelope.receiver.as_deref() == Some(to))
            .map(|(_, envelope)| envelope)
            .collect()
    }
}

fn deliver(route: &Route, envelope: &Envelope) {
    let frame = codec::seal_envelope(route.keys.as_ref(), envelope).expect("relay seal");
    route.events.deliver(InboundFrame::Binary(frame));
}

// ============================================================================
// Harness
// ============================================================================

/// An engine wired to mocks.
pub struct Harness {
    pub engine: Engine,
    pub keys: Arc<Keyring>,
    pub credentials: MockCredentials,
    pub router: Arc<MockEventRouter>,
    pub operations: Arc<MockOperations>,
    pub connector: Arc<MockConnector>,
    pub drivers: mpsc::UnboundedReceiver<LinkDriver>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let (connector, drivers) = MockConnector::new();
        let keys = Arc::new(Keyring::new());
        let credentials = MockCredentials::with_token("t0k3n");
        let router = Arc::new(MockEventRouter::new());
        let operations = Arc::new(MockOperations::new());

        let engine = Engine::new(
            config,
            Collaborators {
                keys: keys.clone(),
                credentials: Arc::new(credentials.clone()),
                router: router.clone(),
                operations: operations.clone(),
                connector: connector.clone(),
            },
        );

        Self {
            engine,
            keys,
            credentials,
            router,
            operations,
            connector,
            drivers,
        }
    }

    /// Next driver handed out by the connector.
    pub async fn next_driver(&mut self) -> LinkDriver {
        within("transport open", self.drivers.recv())
            .await
            .expect("connector dropped")
    }

    /// A driver already handed out, without waiting.
    pub fn try_driver(&mut self) -> Option<LinkDriver> {
        self.drivers.try_recv().ok()
    }

    /// Connect and complete the handshake.
    pub async fn connect_ready(&mut self) -> ServerSide {
        self.engine.connect(None);
        let driver = self.next_driver().await;
        let side = ServerSide::accept(driver).await;
        let engine = self.engine.clone();
        wait_until("engine ready", move || engine.ready()).await;
        side
    }
}
