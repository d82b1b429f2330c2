//! AES-128-CBC with PKCS#7 padding.
//!
//! This is the baseline storage primitive available on every platform tier.
//! It carries no authentication tag, so tampering shows up only as a padding
//! failure or garbage plaintext.

use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};

use crate::keys::CbcKey;
use sealbox_common::{Error, Result};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// IV size prepended to every CBC blob.
pub const IV_SIZE: usize = 16;

/// AES block size.
pub const BLOCK_SIZE: usize = 16;

/// Encrypt plaintext with a fresh random IV.
///
/// # Postconditions
/// - Returns IV || ciphertext, where ciphertext is PKCS#7 padded
pub fn encrypt(key: &CbcKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes128CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| Error::InvalidArgument(format!("Invalid CBC parameters: {}", e)))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut result = Vec::with_capacity(IV_SIZE + ciphertext.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt an IV || ciphertext blob.
///
/// # Errors
/// - `DecryptionFailure` if the blob is shorter than one IV plus one block
/// - `DecryptionFailure` if the ciphertext is not block aligned
/// - `DecryptionFailure` if the padding is invalid (wrong key or tampering)
pub fn decrypt(key: &CbcKey, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < IV_SIZE + BLOCK_SIZE {
        return Err(Error::DecryptionFailure(format!(
            "Ciphertext too short: {} bytes",
            blob.len()
        )));
    }

    let (iv, ciphertext) = blob.split_at(IV_SIZE);
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::DecryptionFailure(
            "Ciphertext is not block aligned".to_string(),
        ));
    }

    Aes128CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| Error::DecryptionFailure(format!("Invalid CBC parameters: {}", e)))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::DecryptionFailure("Invalid padding".to_string()))
}
