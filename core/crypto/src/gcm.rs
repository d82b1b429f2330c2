//! Authenticated encryption using AES-256-GCM with a 16-byte IV.
//!
//! Stored blobs carry a 16-byte IV rather than the customary 12 bytes, so the
//! cipher is instantiated with a `U16` nonce size.

use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, Aead, KeyInit},
    aes::Aes256,
    AesGcm,
};
use rand::{rngs::OsRng, RngCore};

use crate::keys::GCM_KEY_LENGTH;
use sealbox_common::{Error, Result};

/// AES-256-GCM with a 128-bit nonce.
pub type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// IV size prepended to every GCM blob (16 bytes).
pub const IV_SIZE: usize = 16;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Generate a random IV.
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm16> {
    if key.len() != GCM_KEY_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "Invalid key length: expected {}, got {}",
            GCM_KEY_LENGTH,
            key.len()
        )));
    }
    Aes256Gcm16::new_from_slice(key)
        .map_err(|e| Error::InvalidArgument(format!("Invalid key: {}", e)))
}

/// Encrypt plaintext under `key` with a fresh random IV.
///
/// # Postconditions
/// - Returns IV || ciphertext || tag
/// - The blob length is plaintext length + IV_SIZE + TAG_SIZE
///
/// # Errors
/// - Returns error if key length is incorrect
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let iv = generate_iv();
    let ciphertext = seal_with_iv(key, &iv, plaintext)?;

    let mut result = Vec::with_capacity(IV_SIZE + ciphertext.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt an IV || ciphertext || tag blob.
///
/// # Errors
/// - `DecryptionFailure` if the blob is shorter than IV_SIZE + TAG_SIZE
/// - `DecryptionFailure` if authentication fails (tampered data or wrong key)
pub fn decrypt(key: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    let (iv, ciphertext) = split_blob(blob)?;
    open_with_iv(key, iv, ciphertext)
}

/// Split a blob into its IV and ciphertext parts without underflowing.
pub fn split_blob(blob: &[u8]) -> Result<(&[u8; IV_SIZE], &[u8])> {
    if blob.len() < IV_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailure(format!(
            "Ciphertext too short: {} bytes",
            blob.len()
        )));
    }
    let (iv, ciphertext) = blob.split_at(IV_SIZE);
    let iv: &[u8; IV_SIZE] = iv
        .try_into()
        .map_err(|_| Error::DecryptionFailure("Malformed IV".to_string()))?;
    Ok((iv, ciphertext))
}

/// Encrypt plaintext with a caller-provided IV.
///
/// # Warning
/// Using the same IV twice with the same key completely breaks GCM. Callers
/// must pass a fresh IV per encryption.
pub fn seal_with_iv(key: &[u8], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    cipher
        .encrypt(GenericArray::from_slice(iv), plaintext)
        .map_err(|e| Error::InvalidArgument(format!("Encryption failed: {}", e)))
}

/// Decrypt ciphertext (with appended tag) using a specific IV.
pub fn open_with_iv(key: &[u8], iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::DecryptionFailure("Ciphertext too short".to_string()));
    }
    let cipher = cipher_for(key)?;
    cipher
        .decrypt(GenericArray::from_slice(iv), ciphertext)
        .map_err(|e| Error::DecryptionFailure(format!("Authentication failed: {}", e)))
}
