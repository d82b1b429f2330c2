//! Key ciphers: protect app keys with material held by the platform key store.

use rsa::RsaPublicKey;
use std::sync::Arc;
use tracing::{debug, info};

use crate::algorithm::KeyCipherAlgorithm;
use crate::codec;
use sealbox_common::{Error, Result, SensitiveBytes};
use sealbox_crypto::gcm::{self, IV_SIZE};
use sealbox_crypto::{wrap_key, AesKeySpec, AuthProof, CipherHandle, RsaPadding, SecureKeyStore};
use sealbox_storage::KeyValueStore;

/// Metadata key prefix for the IV of a platform-bound wrap.
pub const KEY_IV_ENTRY_PREFIX: &str = "SecureStorageKeyIV";

enum Variant {
    Rsa {
        padding: RsaPadding,
        public_key: RsaPublicKey,
    },
    PlatformAes {
        auth_required: bool,
    },
}

/// A key cipher bound to one key-store alias.
pub struct KeyCipher {
    algorithm: KeyCipherAlgorithm,
    alias: String,
    key_store: Arc<dyn SecureKeyStore>,
    metadata: Arc<dyn KeyValueStore>,
    variant: Variant,
}

impl KeyCipher {
    /// Load the key under this variant's alias, generating it on first use.
    ///
    /// `auth_required` only applies to the platform-bound variant; such
    /// keys live under their own alias so gated and ungated keys never mix.
    ///
    /// # Errors
    /// - `PlatformCapabilityUnsupported` if the platform tier is too low
    /// - `KeyStoreUnavailable` if the key store is locked
    /// - `KeyGenerationFailure` if a missing key cannot be created
    pub fn open(
        algorithm: KeyCipherAlgorithm,
        alias_prefix: &str,
        auth_required: bool,
        key_store: Arc<dyn SecureKeyStore>,
        metadata: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let tier = key_store.tier();
        if !tier.supports(algorithm.min_tier()) {
            return Err(Error::PlatformCapabilityUnsupported(format!(
                "{} needs tier {}, platform is {}",
                algorithm,
                algorithm.min_tier(),
                tier
            )));
        }

        let auth_required = auth_required && algorithm.is_platform_bound();
        let alias = Self::alias_for(algorithm, alias_prefix, auth_required);
        let variant = match algorithm.rsa_padding() {
            Some(padding) => {
                if !key_store.contains_alias(&alias)? {
                    info!(%alias, "Generating RSA key pair");
                    key_store.generate_rsa_key_pair(&alias)?;
                }
                let public_key = key_store.rsa_public_key(&alias)?;
                Variant::Rsa { padding, public_key }
            }
            None => {
                if !key_store.contains_alias(&alias)? {
                    info!(%alias, auth_required, "Generating platform AES key");
                    key_store.generate_aes_key(&alias, AesKeySpec { auth_required })?;
                }
                Variant::PlatformAes { auth_required }
            }
        };

        Ok(Self {
            algorithm,
            alias,
            key_store,
            metadata,
            variant,
        })
    }

    /// Key-store alias for `algorithm` under `alias_prefix`.
    pub fn alias_for(algorithm: KeyCipherAlgorithm, alias_prefix: &str, auth_required: bool) -> String {
        let mut alias = format!("{}.SecureStorageKey.{}", alias_prefix, algorithm.tag());
        if auth_required && algorithm.is_platform_bound() {
            alias.push_str(".auth");
        }
        alias
    }

    /// Remove every key the namespace under `alias_prefix` may hold.
    pub fn delete_all(key_store: &dyn SecureKeyStore, alias_prefix: &str) -> Result<()> {
        for algorithm in KeyCipherAlgorithm::ALL {
            for auth_required in [false, true] {
                key_store.delete_alias(&Self::alias_for(algorithm, alias_prefix, auth_required))?;
            }
        }
        debug!(alias_prefix, "Deleted namespace keys");
        Ok(())
    }

    pub fn algorithm(&self) -> KeyCipherAlgorithm {
        self.algorithm
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Whether the key material stays inside the key store.
    pub fn is_platform_bound(&self) -> bool {
        matches!(self.variant, Variant::PlatformAes { .. })
    }

    /// Whether every use of the key needs a live proof.
    pub fn requires_authentication(&self) -> bool {
        matches!(self.variant, Variant::PlatformAes { auth_required: true })
    }

    fn iv_entry(&self) -> String {
        format!("{}.{}", KEY_IV_ENTRY_PREFIX, self.alias)
    }

    /// Wrap a raw app key.
    ///
    /// The platform-bound variant seals under a fresh IV and persists that
    /// IV, replacing the previous one.
    pub async fn wrap(&self, raw_key: &[u8], proof: Option<AuthProof>) -> Result<Vec<u8>> {
        match &self.variant {
            Variant::Rsa {
                padding,
                public_key,
            } => wrap_key(public_key, *padding, raw_key),
            Variant::PlatformAes { .. } => {
                let iv = gcm::generate_iv();
                let wrapped = self.handle(proof)?.seal(&iv, raw_key)?;
                self.metadata.put(&self.iv_entry(), codec::encode(&iv)).await?;
                debug!(alias = %self.alias, "Wrapped app key with platform key");
                Ok(wrapped)
            }
        }
    }

    /// Unwrap an app key produced by [`wrap`](Self::wrap).
    ///
    /// # Errors
    /// - `UnwrapFailure` for tampered input, a different key generation, or
    ///   a missing IV record
    pub async fn unwrap(&self, wrapped: &[u8], proof: Option<AuthProof>) -> Result<SensitiveBytes> {
        match &self.variant {
            Variant::Rsa { padding, .. } => self.key_store.rsa_decrypt(&self.alias, *padding, wrapped),
            Variant::PlatformAes { .. } => {
                let encoded = self.metadata.get(&self.iv_entry()).await?.ok_or_else(|| {
                    Error::UnwrapFailure(format!("No IV recorded for '{}'", self.alias))
                })?;
                let iv: [u8; IV_SIZE] = codec::decode(&encoded)
                    .ok()
                    .and_then(|bytes| bytes.try_into().ok())
                    .ok_or_else(|| {
                        Error::UnwrapFailure(format!("Malformed IV recorded for '{}'", self.alias))
                    })?;
                let raw = self.handle(proof)?.open(&iv, wrapped).map_err(|e| match e {
                    Error::DecryptionFailure(msg) => Error::UnwrapFailure(msg),
                    other => other,
                })?;
                Ok(SensitiveBytes::new(raw))
            }
        }
    }

    /// Single-use GCM handle on the platform-bound key.
    ///
    /// # Errors
    /// - `InvalidArgument` for RSA variants
    /// - `AuthenticationFailed` if the key is gated and `proof` is missing
    ///   or expired
    pub fn handle(&self, proof: Option<AuthProof>) -> Result<CipherHandle> {
        match self.variant {
            Variant::PlatformAes { .. } => self.key_store.cipher_handle(&self.alias, proof),
            Variant::Rsa { .. } => Err(Error::InvalidArgument(format!(
                "{} exposes no cipher handle",
                self.algorithm
            ))),
        }
    }
}
