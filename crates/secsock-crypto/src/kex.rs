//! Key agreement.
//!
//! Peers agree on a shared secret with X25519 (RFC 7748). The raw agreement
//! output is never used as a cipher key directly; see [`crate::kdf`].

pub mod x25519;

pub use self::x25519::{KeyPair, PUBLIC_KEY_LEN};
