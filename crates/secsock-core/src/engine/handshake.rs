//! Transport handshake.
//!
//! The first frame of every transport is the server's raw X25519 public key.
//! The answer is our raw public key for `server`. Neither frame is wrapped in
//! an envelope, and no envelope flows until the exchange succeeded.

use super::{ConnectionState, Engine, SocketEvent};
use crate::envelope::SERVER;
use crate::transport::NORMAL_CLOSURE;
use crate::Result;

impl Engine {
    /// Whether the next frame of `generation` is its first. Clears the flag.
    pub(super) fn take_first_message(&self, generation: u64) -> bool {
        let mut slot = self.slot();
        slot.generation == generation && std::mem::replace(&mut slot.first_message, false)
    }

    pub(super) fn handshake(&self, generation: u64, server_key: &[u8]) {
        tracing::debug!("Handshaking with the server");

        match self.answer_server_key(server_key) {
            Ok(()) => {
                tracing::info!("Handshake with the server completed");
                self.set_state(ConnectionState::Ready);
                self.emit(SocketEvent::Ready);
            }
            Err(err) => {
                tracing::error!(%err, "Could not handshake with the server, closing the socket");
                let slot = self.slot();
                if slot.generation == generation {
                    if let Some(handle) = &slot.handle {
                        handle.close(NORMAL_CLOSURE);
                    }
                }
            }
        }
    }

    fn answer_server_key(&self, server_key: &[u8]) -> Result<()> {
        let keys = &self.shared.keys;
        keys.generate_key(SERVER)?;
        keys.import_public_key(server_key, SERVER)?;
        let public_key = keys.export_key(SERVER)?;
        self.transmit(public_key)
    }
}
