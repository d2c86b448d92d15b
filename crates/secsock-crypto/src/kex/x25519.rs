//! X25519 key agreement (RFC 7748).
//!
//! Every peer relationship (including the transport-level one with the
//! `server` identity) owns one local key pair. The public half is exported as
//! 32 raw bytes and the counterpart's 32 bytes are imported to compute the
//! shared secret.
//!
//! # Example
//!
//! ```
//! use secsock_crypto::kex::KeyPair;
//!
//! # fn example() -> Result<(), secsock_crypto::Error> {
//! let alice = KeyPair::generate();
//! let bob = KeyPair::generate();
//!
//! let alice_shared = alice.agree(bob.public_key())?;
//! let bob_shared = bob.agree(alice.public_key())?;
//! assert_eq!(*alice_shared, *bob_shared);
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Length of an exported X25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// X25519 key pair.
///
/// The private scalar is zeroed when dropped.
pub struct KeyPair {
    private_key: Zeroizing<StaticSecret>,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let private_key = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public_key = PublicKey::from(&private_key);

        Self {
            private_key: Zeroizing::new(private_key),
            public_key,
        }
    }

    /// Public key bytes, safe to send to the counterpart.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        self.public_key.as_bytes()
    }

    /// Compute the shared secret with a counterpart's public key.
    ///
    /// Accepts any slice so that key material received off the wire can be
    /// passed straight in.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidLength` if `peer_public` is not 32 bytes
    /// - `Error::KeyExchange` if the counterpart key is a low-order point
    pub fn agree(&self, peer_public: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let bytes: [u8; PUBLIC_KEY_LEN] =
            peer_public
                .try_into()
                .map_err(|_| Error::InvalidLength {
                    expected: PUBLIC_KEY_LEN,
                    actual: peer_public.len(),
                })?;

        let shared = self.private_key.diffie_hellman(&PublicKey::from(bytes));

        // An all-zero output means the counterpart sent a low-order point.
        if shared.as_bytes() == &[0u8; 32] {
            return Err(Error::KeyExchange(
                "Invalid peer public key (low-order point)".into(),
            ));
        }

        Ok(Zeroizing::new(*shared.as_bytes()))
    }

    /// Build a key pair from a known private scalar (test vectors only).
    #[doc(hidden)]
    pub fn from_private(private: [u8; 32]) -> Self {
        let private_key = StaticSecret::from(private);
        let public_key = PublicKey::from(&private_key);

        Self {
            private_key: Zeroizing::new(private_key),
            public_key,
        }
    }
}
