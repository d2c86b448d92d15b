//! In-memory key store.
//!
//! Holds one X25519 key pair per peer identity and the AEAD key derived from
//! the agreed secret. Entries live for the lifetime of the process and are
//! shared across reconnects.

use crate::error::{Error, Result};
use crate::traits::KeyStore;
use rand::RngCore;
use secsock_crypto::kdf::derive_peer_key;
use secsock_crypto::{aead, KeyPair, Sealed};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use zeroize::Zeroizing;

/// Key material for a single peer.
#[derive(Default)]
struct PeerKeys {
    pair: Option<KeyPair>,
    shared: Option<Zeroizing<[u8; 32]>>,
    key: Option<Zeroizing<[u8; 32]>>,
}

/// Process-wide key store backed by [`secsock_crypto`].
///
/// # Example
///
/// ```
/// use secsock_platform::{Keyring, KeyStore};
///
/// let client = Keyring::new();
/// let server = Keyring::new();
///
/// client.generate_key("server").unwrap();
/// server.generate_key("client").unwrap();
/// client.import_public_key(&server.export_key("client").unwrap(), "server").unwrap();
/// server.import_public_key(&client.export_key("server").unwrap(), "client").unwrap();
///
/// let sealed = client.encrypt(b"hello", "server").unwrap();
/// assert_eq!(server.decrypt(&sealed.to_bytes(), "client").unwrap(), b"hello");
/// ```
#[derive(Default)]
pub struct Keyring {
    peers: RwLock<HashMap<String, PeerKeys>>,
}

impl Keyring {
    /// Create an empty key store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, PeerKeys>>> {
        self.peers
            .read()
            .map_err(|_| Error::Keystore("Key store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, PeerKeys>>> {
        self.peers
            .write()
            .map_err(|_| Error::Keystore("Key store lock poisoned".into()))
    }

    fn peer_key(&self, peer: &str) -> Result<Zeroizing<[u8; 32]>> {
        self.read()?
            .get(peer)
            .and_then(|keys| keys.key.clone())
            .ok_or_else(|| Error::MissingKey(peer.to_string()))
    }
}

impl KeyStore for Keyring {
    fn generate_key(&self, peer: &str) -> Result<()> {
        let mut peers = self.write()?;
        peers.insert(
            peer.to_string(),
            PeerKeys {
                pair: Some(KeyPair::generate()),
                ..PeerKeys::default()
            },
        );
        tracing::debug!(peer, "Generated key pair");
        Ok(())
    }

    fn has_key_pair(&self, peer: &str) -> bool {
        self.read()
            .map(|peers| peers.get(peer).is_some_and(|keys| keys.pair.is_some()))
            .unwrap_or(false)
    }

    fn export_key(&self, peer: &str) -> Result<Vec<u8>> {
        self.read()?
            .get(peer)
            .and_then(|keys| keys.pair.as_ref())
            .map(|pair| pair.public_key().to_vec())
            .ok_or_else(|| Error::MissingKey(peer.to_string()))
    }

    fn import_public_key(&self, public_key: &[u8], peer: &str) -> Result<()> {
        let mut peers = self.write()?;
        let keys = peers
            .get_mut(peer)
            .ok_or_else(|| Error::MissingKey(peer.to_string()))?;
        let pair = keys
            .pair
            .as_ref()
            .ok_or_else(|| Error::MissingKey(peer.to_string()))?;

        let shared = pair.agree(public_key)?;
        keys.key = Some(derive_peer_key(&shared, None)?);
        keys.shared = Some(shared);
        tracing::debug!(peer, "Imported counterpart public key");
        Ok(())
    }

    fn has_secret(&self, peer: &str) -> bool {
        self.read()
            .map(|peers| peers.get(peer).is_some_and(|keys| keys.key.is_some()))
            .unwrap_or(false)
    }

    fn encrypt(&self, plaintext: &[u8], peer: &str) -> Result<Sealed> {
        let key = self.peer_key(peer)?;
        Ok(aead::seal(&key, plaintext)?)
    }

    fn decrypt(&self, sealed: &[u8], peer: &str) -> Result<Vec<u8>> {
        let key = self.peer_key(peer)?;
        let sealed = Sealed::from_bytes(sealed)?;
        let plaintext = aead::open(&key, &sealed)?;
        Ok(plaintext.to_vec())
    }

    fn set_secret_salt(&self, peer: &str, salt: &[u8]) -> Result<()> {
        let mut peers = self.write()?;
        let keys = peers
            .get_mut(peer)
            .ok_or_else(|| Error::MissingKey(peer.to_string()))?;
        let shared = keys
            .shared
            .as_ref()
            .ok_or_else(|| Error::MissingKey(peer.to_string()))?;

        keys.key = Some(derive_peer_key(shared, Some(salt))?);
        Ok(())
    }

    fn forget(&self, peer: &str) {
        if let Ok(mut peers) = self.write() {
            peers.remove(peer);
        }
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        bytes
    }
}
