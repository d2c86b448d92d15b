//! AES-256-GCM sealing.
//!
//! Every message is sealed under a fresh random 12-byte IV. On the wire a
//! sealed message is the IV followed by the ciphertext (which already ends
//! with the 16-byte tag):
//!
//! ```text
//! iv[12] || ciphertext || tag[16]
//! ```

use crate::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

/// IV length for AES-256-GCM.
pub const IV_LEN: usize = 12;

/// Authentication tag length.
pub const TAG_LEN: usize = 16;

/// A sealed message: IV plus ciphertext-with-tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Random IV used for this message.
    pub iv: [u8; IV_LEN],
    /// Ciphertext with the tag appended.
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Concatenate into `iv || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split `iv || ciphertext` back apart.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidLength` if the input cannot hold an IV and a tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < IV_LEN + TAG_LEN {
            return Err(Error::InvalidLength {
                expected: IV_LEN + TAG_LEN,
                actual: bytes.len(),
            });
        }

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&bytes[..IV_LEN]);

        Ok(Self {
            iv,
            ciphertext: bytes[IV_LEN..].to_vec(),
        })
    }
}

/// Encrypt with AES-256-GCM.
///
/// Returns ciphertext with the 16-byte tag appended.
///
/// # Example
/// ```
/// use secsock_crypto::aead::aes256gcm_encrypt;
///
/// let key = [0x42; 32];
/// let iv = [0x01; 12];
/// let ciphertext = aes256gcm_encrypt(&key, &iv, b"hello", b"").unwrap();
/// assert_eq!(ciphertext.len(), 5 + 16);
/// ```
pub fn aes256gcm_encrypt(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::Encryption("Invalid AES-256-GCM key length".into()))?;

    cipher
        .encrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::Encryption("AES-256-GCM encryption failed".into()))
}

/// Decrypt with AES-256-GCM.
///
/// # Errors
/// Returns `Error::Decryption` if tag verification fails.
pub fn aes256gcm_decrypt(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::Decryption("Invalid AES-256-GCM key length".into()))?;

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: ciphertext_and_tag,
                aad,
            },
        )
        .map_err(|_| Error::Decryption("AES-256-GCM authentication failed".into()))?;

    Ok(Zeroizing::new(plaintext))
}

/// Seal `plaintext` under `key` with a fresh random IV.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Sealed> {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = aes256gcm_encrypt(key, &iv, plaintext, &[])?;
    Ok(Sealed { iv, ciphertext })
}

/// Open a sealed message.
///
/// # Errors
/// Returns `Error::Decryption` if the key is wrong or the message was altered.
pub fn open(key: &[u8; 32], sealed: &Sealed) -> Result<Zeroizing<Vec<u8>>> {
    aes256gcm_decrypt(key, &sealed.iv, &sealed.ciphertext, &[])
}
