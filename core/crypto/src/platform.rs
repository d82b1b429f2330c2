//! Platform secure key store abstraction.
//!
//! Platform implementations keep key material inside secure hardware where
//! available. Symmetric keys are never exported: callers receive a
//! [`CipherHandle`] bound to the key for exactly one operation.

use rsa::RsaPublicKey;
use std::fmt;
use std::time::{Duration, Instant};

use crate::gcm::IV_SIZE;
use crate::wrap::RsaPadding;
use sealbox_common::{PlatformTier, Result, SensitiveBytes};

/// Generation parameters for a platform-bound AES key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesKeySpec {
    /// Whether every use needs a live authentication proof.
    pub auth_required: bool,
}

/// Proof that the user authenticated recently.
///
/// Issued by the authentication gate after a successful prompt. A proof is
/// moved into the key store when a handle is requested, so it backs at most
/// one handle.
pub struct AuthProof {
    issued_at: Instant,
    validity: Duration,
}

impl AuthProof {
    /// Issue a proof valid for `validity` starting now.
    pub fn issue(validity: Duration) -> Self {
        Self {
            issued_at: Instant::now(),
            validity,
        }
    }

    /// Whether the proof is still inside its validity window.
    pub fn is_live(&self) -> bool {
        self.issued_at.elapsed() <= self.validity
    }
}

impl fmt::Debug for AuthProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProof")
            .field("live", &self.is_live())
            .finish()
    }
}

/// Cipher operations bound to a key that never leaves the key store.
pub trait BoundCipher: Send {
    /// Encrypt with the given IV, returning ciphertext with the tag appended.
    fn seal(self: Box<Self>, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt ciphertext with appended tag.
    fn open(self: Box<Self>, iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Single-use AES-GCM handle bound to a platform key.
///
/// `seal` and `open` consume the handle; acquire a new one per operation.
pub struct CipherHandle {
    inner: Box<dyn BoundCipher>,
}

impl CipherHandle {
    /// Wrap a platform-specific bound cipher.
    pub fn new(inner: Box<dyn BoundCipher>) -> Self {
        Self { inner }
    }

    /// Encrypt `plaintext` under the bound key.
    pub fn seal(self, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.inner.seal(iv, plaintext)
    }

    /// Decrypt `ciphertext` under the bound key.
    pub fn open(self, iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.inner.open(iv, ciphertext)
    }
}

impl fmt::Debug for CipherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherHandle([BOUND])")
    }
}

/// Secure key store offered by the host platform.
///
/// All operations are keyed by alias. Errors follow the common taxonomy:
/// `KeyStoreUnavailable` when the store is locked or unreachable,
/// `KeyGenerationFailure` when a key cannot be created, `UnwrapFailure` when
/// a private-key operation rejects its input, and `AuthenticationFailed`
/// when an authentication-bound key is used without a live proof.
pub trait SecureKeyStore: Send + Sync {
    /// Capability tier of the platform this store runs on.
    fn tier(&self) -> PlatformTier;

    /// Check whether a key exists under `alias`.
    fn contains_alias(&self, alias: &str) -> Result<bool>;

    /// Generate an RSA key pair under `alias`, replacing any existing entry.
    fn generate_rsa_key_pair(&self, alias: &str) -> Result<()>;

    /// Public half of the RSA key pair under `alias`.
    fn rsa_public_key(&self, alias: &str) -> Result<RsaPublicKey>;

    /// Decrypt with the private half of the RSA key pair under `alias`.
    fn rsa_decrypt(&self, alias: &str, padding: RsaPadding, data: &[u8]) -> Result<SensitiveBytes>;

    /// Generate a 256-bit AES key under `alias`, replacing any existing entry.
    fn generate_aes_key(&self, alias: &str, spec: AesKeySpec) -> Result<()>;

    /// Acquire a single-use GCM handle for the AES key under `alias`.
    fn cipher_handle(&self, alias: &str, proof: Option<AuthProof>) -> Result<CipherHandle>;

    /// Remove the key under `alias`. Removing a missing alias is not an error.
    fn delete_alias(&self, alias: &str) -> Result<()>;
}
