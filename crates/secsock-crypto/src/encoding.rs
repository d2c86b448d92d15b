//! Base64 helpers.
//!
//! Public keys and peer-sealed bodies travel inside JSON envelopes as standard
//! (padded) base64 text.

use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode bytes as standard base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64 text.
///
/// Surrounding whitespace and stray double quotes are ignored; some peers
/// JSON-encode the key string twice.
///
/// # Errors
///
/// Returns `Error::Encoding` if the text is not valid base64.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let trimmed = text.trim().trim_matches('"');
    Ok(STANDARD.decode(trimmed)?)
}
