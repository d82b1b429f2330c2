//! In-process key store.
//!
//! Useful for testing and for desktop targets without a hardware key store.
//! Keys live in memory and are lost on drop, but the store enforces the same
//! rules a hardware store does: symmetric keys are only reachable through
//! handles and authentication-bound keys demand a live proof.

use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::gcm::{self, IV_SIZE};
use crate::keys::GcmKey;
use crate::platform::{AesKeySpec, AuthProof, BoundCipher, CipherHandle, SecureKeyStore};
use crate::wrap::{unwrap_key, RsaPadding};
use sealbox_common::{Error, PlatformTier, Result, SensitiveBytes};

/// Default RSA modulus size in bits.
pub const DEFAULT_RSA_BITS: usize = 2048;

enum StoredKey {
    Rsa(Box<RsaPrivateKey>),
    Aes { key: GcmKey, spec: AesKeySpec },
}

/// Software key store.
pub struct SoftwareKeyStore {
    tier: AtomicU32,
    rsa_bits: usize,
    available: AtomicBool,
    keys: Mutex<HashMap<String, StoredKey>>,
}

impl SoftwareKeyStore {
    /// Create an empty store reporting `tier`.
    pub fn new(tier: PlatformTier) -> Self {
        Self {
            tier: AtomicU32::new(tier.0),
            rsa_bits: DEFAULT_RSA_BITS,
            available: AtomicBool::new(true),
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Use a different RSA modulus size for newly generated key pairs.
    pub fn with_rsa_bits(mut self, bits: usize) -> Self {
        self.rsa_bits = bits;
        self
    }

    /// Simulate an OS upgrade. Existing keys are kept.
    pub fn set_tier(&self, tier: PlatformTier) {
        self.tier.store(tier.0, Ordering::SeqCst);
    }

    /// Simulate the store becoming locked (`false`) or unlocked (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn keys(&self) -> Result<MutexGuard<'_, HashMap<String, StoredKey>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::KeyStoreUnavailable("Key store is locked".to_string()));
        }
        self.keys
            .lock()
            .map_err(|_| Error::KeyStoreUnavailable("Key store state poisoned".to_string()))
    }

    fn missing(alias: &str) -> Error {
        Error::KeyStoreUnavailable(format!("No key under alias '{}'", alias))
    }
}

impl SecureKeyStore for SoftwareKeyStore {
    fn tier(&self) -> PlatformTier {
        PlatformTier(self.tier.load(Ordering::SeqCst))
    }

    fn contains_alias(&self, alias: &str) -> Result<bool> {
        Ok(self.keys()?.contains_key(alias))
    }

    fn generate_rsa_key_pair(&self, alias: &str) -> Result<()> {
        let mut keys = self.keys()?;
        let private_key = RsaPrivateKey::new(&mut OsRng, self.rsa_bits)
            .map_err(|e| Error::KeyGenerationFailure(format!("RSA generation failed: {}", e)))?;
        keys.insert(alias.to_string(), StoredKey::Rsa(Box::new(private_key)));
        debug!(alias, bits = self.rsa_bits, "Generated RSA key pair");
        Ok(())
    }

    fn rsa_public_key(&self, alias: &str) -> Result<RsaPublicKey> {
        match self.keys()?.get(alias) {
            Some(StoredKey::Rsa(private_key)) => Ok(RsaPublicKey::from(private_key.as_ref())),
            Some(StoredKey::Aes { .. }) => Err(Error::InvalidArgument(format!(
                "Alias '{}' holds a symmetric key",
                alias
            ))),
            None => Err(Self::missing(alias)),
        }
    }

    fn rsa_decrypt(&self, alias: &str, padding: RsaPadding, data: &[u8]) -> Result<SensitiveBytes> {
        match self.keys()?.get(alias) {
            Some(StoredKey::Rsa(private_key)) => unwrap_key(private_key, padding, data),
            Some(StoredKey::Aes { .. }) => Err(Error::InvalidArgument(format!(
                "Alias '{}' holds a symmetric key",
                alias
            ))),
            None => Err(Self::missing(alias)),
        }
    }

    fn generate_aes_key(&self, alias: &str, spec: AesKeySpec) -> Result<()> {
        let mut keys = self.keys()?;
        keys.insert(
            alias.to_string(),
            StoredKey::Aes {
                key: GcmKey::generate(),
                spec,
            },
        );
        debug!(alias, auth_required = spec.auth_required, "Generated AES key");
        Ok(())
    }

    fn cipher_handle(&self, alias: &str, proof: Option<AuthProof>) -> Result<CipherHandle> {
        match self.keys()?.get(alias) {
            Some(StoredKey::Aes { key, spec }) => {
                if spec.auth_required {
                    match proof {
                        Some(proof) if proof.is_live() => {}
                        Some(_) => {
                            return Err(Error::AuthenticationFailed(
                                "Authentication proof expired".to_string(),
                            ))
                        }
                        None => {
                            return Err(Error::AuthenticationFailed(
                                "Key requires user authentication".to_string(),
                            ))
                        }
                    }
                }
                Ok(CipherHandle::new(Box::new(SoftwareBoundCipher { key: key.clone() })))
            }
            Some(StoredKey::Rsa(_)) => Err(Error::InvalidArgument(format!(
                "Alias '{}' holds an RSA key pair",
                alias
            ))),
            None => Err(Self::missing(alias)),
        }
    }

    fn delete_alias(&self, alias: &str) -> Result<()> {
        self.keys()?.remove(alias);
        Ok(())
    }
}

struct SoftwareBoundCipher {
    key: GcmKey,
}

impl BoundCipher for SoftwareBoundCipher {
    fn seal(self: Box<Self>, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        gcm::seal_with_iv(self.key.as_bytes(), iv, plaintext)
    }

    fn open(self: Box<Self>, iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        gcm::open_with_iv(self.key.as_bytes(), iv, ciphertext)
    }
}
