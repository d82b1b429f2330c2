//! Base64 text encoding for values kept in string stores.

use base64::{engine::general_purpose::STANDARD, Engine};

use sealbox_common::{Error, Result};

/// Encode bytes with the standard padded alphabet.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64, tolerating embedded line breaks.
///
/// # Errors
/// - `DecryptionFailure` for anything that is not valid base64
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::DecryptionFailure(format!("Invalid base64: {}", e)))
}
