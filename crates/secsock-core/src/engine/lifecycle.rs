//! Connection lifecycle: connect, throttle, close and reconnect.

use super::{lock, ConnectionState, Engine, SocketEvent};
use crate::transport::{Link, TransportEvent, NORMAL_CLOSURE, PROTOCOL_ERROR};
use crate::{Error, Result};
use tokio::sync::mpsc;
use tokio::time::Instant;

impl Engine {
    /// Open a transport to `socket_url + token`.
    ///
    /// Without a token the credential provider is asked. With no token or no
    /// socket URL this does nothing. Calls within the throttle window of the
    /// previous effective call are dropped. Any existing transport is closed
    /// with a normal-closure code first.
    pub fn connect(&self, token: Option<String>) {
        let Some(token) = token.or_else(|| self.shared.credentials.query_token()) else {
            tracing::debug!("No query token, not connecting");
            return;
        };
        let Some(base) = self.shared.config.socket_url.as_deref() else {
            tracing::debug!("No socket URL, not connecting");
            return;
        };
        if !self.admit_connect() {
            tracing::debug!("Connect throttled");
            return;
        }

        tracing::info!(socket_url = base, "Socket init");
        let Link { handle, events } = self.shared.connector.open(&format!("{}{}", base, token));

        let generation = {
            let mut slot = self.slot();
            if let Some(previous) = slot.handle.take() {
                previous.close(NORMAL_CLOSURE);
            }
            slot.stop_tasks();
            slot.generation += 1;
            slot.handle = Some(handle);
            slot.first_message = true;
            slot.generation
        };
        self.abandon_ping();
        self.set_state(ConnectionState::Connecting);

        let reader = tokio::spawn(self.clone().read_loop(generation, events));
        let mut slot = self.slot();
        if slot.generation == generation {
            slot.reader = Some(reader);
        } else {
            reader.abort();
        }
    }

    /// Close the transport with a normal-closure code. No reconnect follows.
    pub fn close(&self) {
        {
            let mut slot = self.slot();
            if let Some(handle) = slot.handle.take() {
                tracing::info!("Closing socket");
                handle.close(NORMAL_CLOSURE);
            }
            slot.stop_tasks();
            slot.generation += 1;
        }
        self.abandon_ping();
        self.set_state(ConnectionState::Disconnected);
    }

    /// The credential provider logged in with `token`.
    pub fn logged_in(&self, token: String) {
        self.connect(Some(token));
    }

    /// The credential provider logged out.
    pub fn logged_out(&self) {
        self.close();
    }

    /// Leading-edge throttle over effective connects.
    fn admit_connect(&self) -> bool {
        let now = Instant::now();
        let mut last = lock(&self.shared.last_connect);
        match *last {
            Some(at) if now.duration_since(at) < self.shared.config.throttle() => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Make sure a handshaken transport exists, connecting if needed.
    pub(crate) async fn ensure_ready(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        if self.ready() {
            return Ok(());
        }
        if !self.link_open() {
            tracing::warn!("Socket is not open, trying to reconnect");
            self.connect(None);
        }

        let ready = tokio::time::timeout(
            self.shared.config.ready_timeout(),
            state.wait_for(|state| *state == ConnectionState::Ready),
        )
        .await
        .map(|changed| changed.is_ok())
        .unwrap_or(false);

        if ready {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn read_loop(self, generation: u64, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                break;
            }
            match event {
                TransportEvent::Open => self.on_open(generation),
                TransportEvent::Frame(frame) => self.handle_frame(generation, frame).await,
                TransportEvent::Error(reason) => {
                    tracing::warn!(%reason, "Socket error");
                    self.emit(SocketEvent::Error(reason));
                }
                TransportEvent::Closed(code) => {
                    self.on_close(generation, code);
                    break;
                }
            }
        }
    }

    fn on_open(&self, generation: u64) {
        tracing::debug!(generation, "Connected");
        self.touch();
        self.set_state(ConnectionState::HandshakePending);
        self.emit(SocketEvent::Connected);
        self.start_watchdog(generation);
    }

    fn on_close(&self, generation: u64, code: u16) {
        {
            let mut slot = self.slot();
            if slot.generation != generation {
                return;
            }
            slot.handle = None;
            slot.reader = None;
            for task in [slot.watchdog.take(), slot.ping_timeout.take()]
                .into_iter()
                .flatten()
            {
                task.abort();
            }
        }
        self.abandon_ping();

        if code == NORMAL_CLOSURE || code == PROTOCOL_ERROR {
            tracing::info!(code, "Socket closed");
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        tracing::warn!(code, "Socket closed unexpectedly, scheduling reconnect");
        self.emit(SocketEvent::Disconnected { code });
        self.set_state(ConnectionState::Reconnecting);

        let engine = self.downgrade();
        let delay = self.shared.config.reconnect_delay();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = Engine::upgrade(&engine) {
                engine.connect(None);
            }
        });

        let mut slot = self.slot();
        if let Some(previous) = slot.reconnect.replace(task) {
            previous.abort();
        }
    }
}
