//! Symmetric key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use rand::{rngs::OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use sealbox_common::{Error, Result};

/// Length of the AES-CBC application key in bytes (128-bit).
pub const CBC_KEY_LENGTH: usize = 16;

/// Length of AES-GCM keys in bytes (256-bit).
pub const GCM_KEY_LENGTH: usize = 32;

/// Application key for the AES-CBC storage cipher.
///
/// Generated once per namespace, then kept only in wrapped form at rest.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CbcKey {
    key: [u8; CBC_KEY_LENGTH],
}

impl CbcKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; CBC_KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Rebuild a key from unwrapped bytes.
    ///
    /// # Errors
    /// - `UnwrapFailure` if the slice has the wrong length, which happens when
    ///   a wrapped key from another cipher generation is unwrapped.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; CBC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::UnwrapFailure(format!(
                "Invalid CBC key length: expected {}, got {}",
                CBC_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; CBC_KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; CBC_KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for CbcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CbcKey([REDACTED])")
    }
}

/// 256-bit AES-GCM key.
///
/// Used both for wrapped application keys and as the backing material of
/// software key store entries.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GcmKey {
    key: [u8; GCM_KEY_LENGTH],
}

impl GcmKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; GCM_KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Rebuild a key from unwrapped bytes.
    ///
    /// # Errors
    /// - `UnwrapFailure` if the slice has the wrong length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; GCM_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::UnwrapFailure(format!(
                "Invalid GCM key length: expected {}, got {}",
                GCM_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; GCM_KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; GCM_KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for GcmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcmKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbc_key_generate() {
        let key1 = CbcKey::generate();
        let key2 = CbcKey::generate();

        // Random keys should be different
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let err = CbcKey::from_slice(&[0u8; GCM_KEY_LENGTH]).unwrap_err();
        assert!(matches!(err, Error::UnwrapFailure(_)));

        let err = GcmKey::from_slice(&[0u8; CBC_KEY_LENGTH]).unwrap_err();
        assert!(matches!(err, Error::UnwrapFailure(_)));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = GcmKey::from_bytes([7u8; GCM_KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "GcmKey([REDACTED])");
    }
}
