//! Key derivation (HKDF-SHA256).
//!
//! The AEAD key for a peer is derived from the X25519 shared secret:
//!
//! - IKM: shared secret (32 bytes)
//! - Salt: the peer's secret salt, or empty until one has been set
//! - Info: `"secsock-peer-key"`
//! - Length: 32 bytes

use crate::{Error, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

const PEER_KEY_INFO: &[u8] = b"secsock-peer-key";

/// Generic HKDF-SHA256 (RFC 5869).
///
/// # Example
/// ```
/// use secsock_crypto::kdf::hkdf_sha256;
///
/// let okm = hkdf_sha256(&[0x0b; 22], b"salt", b"info", 42).unwrap();
/// assert_eq!(okm.len(), 42);
/// ```
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut okm = vec![0u8; output_len];
    hk.expand(info, &mut okm)
        .map_err(|_| Error::KeyDerivation("HKDF expansion failed".into()))?;

    Ok(Zeroizing::new(okm))
}

/// Derive the AEAD key for a peer from its shared secret and optional salt.
pub fn derive_peer_key(shared_secret: &[u8; 32], salt: Option<&[u8]>) -> Result<Zeroizing<[u8; 32]>> {
    let okm = hkdf_sha256(shared_secret, salt.unwrap_or(&[]), PEER_KEY_INFO, 32)?;

    let mut key = [0u8; 32];
    key.copy_from_slice(&okm);
    Ok(Zeroizing::new(key))
}
