//! Cryptographic primitives for the secsock messaging protocol.
//!
//! This crate provides the building blocks the peer key store is made of:
//! - Key agreement (X25519)
//! - Authenticated encryption (AES-256-GCM, `iv || ciphertext || tag` framing)
//! - Key derivation (HKDF-SHA256, optionally salted)
//! - Base64 helpers for carrying key material inside JSON envelopes
//!
//! Security rules followed throughout:
//! - All secrets use Zeroizing wrappers
//! - Fresh random IV per sealed message
//! - No logging of key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod kex;

pub use aead::Sealed;
pub use error::{Error, Result};
pub use kex::KeyPair;
