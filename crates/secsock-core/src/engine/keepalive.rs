//! Keepalive.
//!
//! While the transport is open a watchdog ticks every `ping_interval`. A tick
//! pings the server unless something arrived within `freshness` or a ping is
//! already out. A ping unanswered after `ping_timeout` forces a reconnect:
//! transport close events do not reliably fire on silent failures.

use super::{lock, Engine, Slot};
use crate::envelope::Envelope;
use crate::query::{Continuation, PendingQuery};
use secsock_crypto::encoding::encode_base64;
use std::sync::atomic::Ordering;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Salt bytes carried by each ping.
const PING_SALT_LEN: usize = 16;

impl Engine {
    /// Ping the server.
    ///
    /// Does nothing if inbound activity is fresh or a ping is outstanding.
    pub fn ping(&self) {
        if self.since_last_seen() < self.shared.config.freshness() {
            return;
        }
        if self.shared.waiting_ping.swap(true, Ordering::SeqCst) {
            return;
        }

        let salt = self.shared.keys.random_bytes(PING_SALT_LEN);
        let query_id = self.shared.queries.fresh_id();
        let envelope = Envelope::ping(encode_base64(&salt)).with_query_id(query_id.clone());
        let (responder, reply) = oneshot::channel();
        let query = PendingQuery::new(envelope, true, Continuation::Ping { salt }).with_responder(responder);
        *lock(&self.shared.ping_query) = Some(query_id.clone());

        tracing::trace!(%query_id, "Sending ping");
        if let Err(err) = self.submit(query) {
            // The timeout below still forces the reconnect.
            tracing::warn!(%err, "Could not send ping");
        }

        let engine = self.downgrade();
        let timeout = self.shared.config.ping_timeout();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(engine) = Engine::upgrade(&engine) else {
                return;
            };
            if engine.abandon_ping() {
                tracing::warn!("Ping timed out, reconnecting");
                engine.connect(None);
            }
        });
        self.replace_task(|slot| &mut slot.ping_timeout, timer);

        let engine = self.downgrade();
        tokio::spawn(async move {
            // Err means the entry was dropped by `abandon_ping`.
            if let Ok(Ok(_)) = reply.await {
                if let Some(engine) = Engine::upgrade(&engine) {
                    tracing::trace!("Pong");
                    engine.touch();
                    let current = {
                        let mut outstanding = lock(&engine.shared.ping_query);
                        let current = outstanding.as_deref() == Some(query_id.as_str());
                        if current {
                            *outstanding = None;
                        }
                        current
                    };
                    if current {
                        engine.shared.waiting_ping.store(false, Ordering::SeqCst);
                        if let Some(timer) = engine.slot().ping_timeout.take() {
                            timer.abort();
                        }
                    }
                }
            }
        });
    }

    /// Forget the outstanding ping and drop its pending entry.
    ///
    /// Returns whether a ping was outstanding.
    pub(super) fn abandon_ping(&self) -> bool {
        let outstanding = self.shared.waiting_ping.swap(false, Ordering::SeqCst);
        if let Some(query_id) = lock(&self.shared.ping_query).take() {
            self.shared.queries.take(&query_id);
        }
        outstanding
    }

    /// Start ticking for the transport of `generation`.
    pub(super) fn start_watchdog(&self, generation: u64) {
        let engine = self.downgrade();
        let period = self.shared.config.ping_interval();

        let watchdog = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = Engine::upgrade(&engine) else {
                    break;
                };
                if !engine.is_current(generation) || !engine.link_open() {
                    tracing::debug!(generation, "Transport not open, stopping keepalive");
                    break;
                }
                engine.ping();
            }
        });

        let mut slot = self.slot();
        if slot.generation == generation {
            if let Some(previous) = slot.watchdog.replace(watchdog) {
                previous.abort();
            }
        } else {
            watchdog.abort();
        }
    }

    fn replace_task(&self, field: impl FnOnce(&mut Slot) -> &mut Option<JoinHandle<()>>, task: JoinHandle<()>) {
        let mut slot = self.slot();
        if let Some(previous) = field(&mut *slot).replace(task) {
            previous.abort();
        }
    }
}
