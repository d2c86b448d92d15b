//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration.
///
/// Every field has a default, so a host can deserialize a partial document:
///
/// ```
/// use secsock_core::EngineConfig;
///
/// let config: EngineConfig =
///     serde_json::from_str(r#"{ "socketUrl": "wss://example.org/ws?token=" }"#).unwrap();
/// assert_eq!(config.throttle_ms, 3000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Socket URL prefix; the query token is appended to it.
    pub socket_url: Option<String>,
    /// Window in which repeated `connect` calls collapse into one.
    pub throttle_ms: u64,
    /// Delay before reconnecting after an abnormal close.
    pub reconnect_delay_ms: u64,
    /// Keepalive tick interval.
    pub ping_interval_ms: u64,
    /// Inbound activity younger than this suppresses a ping.
    pub freshness_ms: u64,
    /// How long a ping may stay unanswered before reconnecting.
    pub ping_timeout_ms: u64,
    /// How long a send waits for the handshake to complete.
    pub ready_timeout_ms: u64,
    /// Maximum automatic resends of one request during key exchange.
    pub max_replays: u8,
    /// Re-derive the transport secret with the ping salt after each pong.
    pub rotate_salt_on_ping: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket_url: None,
            throttle_ms: 3000,
            reconnect_delay_ms: 3000,
            ping_interval_ms: 10_000,
            freshness_ms: 5000,
            ping_timeout_ms: 10_000,
            ready_timeout_ms: 10_000,
            max_replays: 3,
            rotate_salt_on_ping: false,
        }
    }
}

impl EngineConfig {
    /// Config pointing at `socket_url` with default timings.
    pub fn with_url(socket_url: impl Into<String>) -> Self {
        Self {
            socket_url: Some(socket_url.into()),
            ..Self::default()
        }
    }

    pub(crate) fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub(crate) fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub(crate) fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub(crate) fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }

    pub(crate) fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub(crate) fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}
