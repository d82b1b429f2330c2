//! Storage ciphers: encrypt entry payloads into self-describing blobs.
//!
//! Every blob is `IV || ciphertext` (with the GCM tag appended by the
//! primitive). IVs are random per encryption for all variants.

use std::sync::Arc;
use tracing::{debug, info};

use crate::algorithm::{AlgorithmPair, StorageCipherAlgorithm};
use crate::auth::{AuthenticationGate, PromptInfo};
use crate::codec;
use crate::key_cipher::KeyCipher;
use sealbox_common::{Error, Result, SensitiveBytes};
use sealbox_crypto::{cbc, gcm, AuthProof, CbcKey, GcmKey, SecureKeyStore};
use sealbox_storage::KeyValueStore;

/// Metadata key prefix for wrapped app keys.
pub const WRAPPED_KEY_ENTRY_PREFIX: &str = "SecureStorageWrappedKey";

enum Engine {
    /// App key unwrapped into memory, CBC.
    Cbc(CbcKey),
    /// App key unwrapped into memory, GCM.
    Gcm(GcmKey),
    /// Key never leaves the key store; a handle is acquired per operation.
    Platform {
        key_cipher: KeyCipher,
        gate: Option<(Arc<AuthenticationGate>, PromptInfo)>,
    },
}

/// A ready storage cipher.
pub struct StorageCipher {
    pair: AlgorithmPair,
    engine: Engine,
}

impl StorageCipher {
    /// Pair this cipher was built for.
    pub fn pair(&self) -> AlgorithmPair {
        self.pair
    }

    pub fn algorithm(&self) -> StorageCipherAlgorithm {
        self.pair.storage
    }

    /// Whether each operation prompts for authentication.
    pub fn requires_authentication(&self) -> bool {
        matches!(self.engine, Engine::Platform { gate: Some(_), .. })
    }

    async fn proof(&self) -> Result<Option<AuthProof>> {
        match &self.engine {
            Engine::Platform {
                gate: Some((gate, prompt)),
                ..
            } => gate.authorize(prompt).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Encrypt `plaintext` under a fresh IV.
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match &self.engine {
            Engine::Cbc(key) => cbc::encrypt(key, plaintext),
            Engine::Gcm(key) => gcm::encrypt(key.as_bytes(), plaintext),
            Engine::Platform { key_cipher, .. } => {
                let proof = self.proof().await?;
                let iv = gcm::generate_iv();
                let sealed = key_cipher.handle(proof)?.seal(&iv, plaintext)?;

                let mut blob = Vec::with_capacity(iv.len() + sealed.len());
                blob.extend_from_slice(&iv);
                blob.extend_from_slice(&sealed);
                Ok(blob)
            }
        }
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Malformed blobs are rejected before any authentication prompt.
    ///
    /// # Errors
    /// - `DecryptionFailure` for truncated input, a bad tag, or a wrong key
    pub async fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        match &self.engine {
            Engine::Cbc(key) => cbc::decrypt(key, blob),
            Engine::Gcm(key) => gcm::decrypt(key.as_bytes(), blob),
            Engine::Platform { key_cipher, .. } => {
                let (iv, ciphertext) = gcm::split_blob(blob)?;
                let proof = self.proof().await?;
                key_cipher.handle(proof)?.open(iv, ciphertext)
            }
        }
    }

    /// Decrypt a blob holding a UTF-8 value.
    ///
    /// # Errors
    /// - `DecryptionFailure` as for [`decrypt`](Self::decrypt), or when the
    ///   plaintext is not UTF-8
    pub async fn decrypt_text(&self, blob: &[u8]) -> Result<String> {
        let plaintext = self.decrypt(blob).await?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::DecryptionFailure("Value is not UTF-8".to_string()))
    }
}

/// Builds storage ciphers for one namespace.
pub struct CipherFactory {
    key_store: Arc<dyn SecureKeyStore>,
    metadata: Arc<dyn KeyValueStore>,
    gate: Arc<AuthenticationGate>,
    prompt: PromptInfo,
    alias_prefix: String,
    require_authentication: bool,
}

impl CipherFactory {
    pub fn new(
        key_store: Arc<dyn SecureKeyStore>,
        metadata: Arc<dyn KeyValueStore>,
        gate: Arc<AuthenticationGate>,
        prompt: PromptInfo,
        alias_prefix: impl Into<String>,
        require_authentication: bool,
    ) -> Self {
        Self {
            key_store,
            metadata,
            gate,
            prompt,
            alias_prefix: alias_prefix.into(),
            require_authentication,
        }
    }

    pub fn key_store(&self) -> &Arc<dyn SecureKeyStore> {
        &self.key_store
    }

    pub fn alias_prefix(&self) -> &str {
        &self.alias_prefix
    }

    /// Metadata key holding the wrapped app key of `pair`.
    pub fn wrapped_key_entry(pair: AlgorithmPair) -> String {
        format!(
            "{}.{}.{}",
            WRAPPED_KEY_ENTRY_PREFIX,
            pair.key.tag(),
            pair.storage.tag()
        )
    }

    /// Build the storage cipher for `pair`.
    ///
    /// # Errors
    /// - `InvalidArgument` for the biometric cipher over an RSA key cipher
    /// - Key-store, unwrap, and authentication errors from the key cipher
    pub async fn build(&self, pair: AlgorithmPair) -> Result<StorageCipher> {
        if !pair.is_coherent() {
            return Err(Error::InvalidArgument(format!(
                "{} requires a platform-bound key cipher",
                pair.storage
            )));
        }

        let auth_required = self.require_authentication
            || pair.storage == StorageCipherAlgorithm::AesGcmBiometric;
        let key_cipher = KeyCipher::open(
            pair.key,
            &self.alias_prefix,
            auth_required,
            self.key_store.clone(),
            self.metadata.clone(),
        )?;

        let engine = match pair.storage {
            StorageCipherAlgorithm::AesCbcPkcs7 => {
                let raw = self
                    .load_or_create_app_key(pair, &key_cipher, || CbcKey::generate().as_bytes().to_vec())
                    .await?;
                Engine::Cbc(CbcKey::from_slice(raw.as_bytes())?)
            }
            StorageCipherAlgorithm::AesGcm | StorageCipherAlgorithm::AesGcmBiometric
                if key_cipher.is_platform_bound() =>
            {
                let gate = key_cipher
                    .requires_authentication()
                    .then(|| (self.gate.clone(), self.prompt.clone()));
                Engine::Platform { key_cipher, gate }
            }
            StorageCipherAlgorithm::AesGcm | StorageCipherAlgorithm::AesGcmBiometric => {
                let raw = self
                    .load_or_create_app_key(pair, &key_cipher, || GcmKey::generate().as_bytes().to_vec())
                    .await?;
                Engine::Gcm(GcmKey::from_slice(raw.as_bytes())?)
            }
        };

        debug!(%pair, "Storage cipher ready");
        Ok(StorageCipher { pair, engine })
    }

    async fn load_or_create_app_key(
        &self,
        pair: AlgorithmPair,
        key_cipher: &KeyCipher,
        generate: impl FnOnce() -> Vec<u8>,
    ) -> Result<SensitiveBytes> {
        let entry = Self::wrapped_key_entry(pair);

        if let Some(encoded) = self.metadata.get(&entry).await? {
            let wrapped = codec::decode(&encoded)
                .map_err(|_| Error::UnwrapFailure(format!("Wrapped key '{}' is not base64", entry)))?;
            let proof = self.key_proof(key_cipher).await?;
            return key_cipher.unwrap(&wrapped, proof).await;
        }

        let raw = SensitiveBytes::new(generate());
        let proof = self.key_proof(key_cipher).await?;
        let wrapped = key_cipher.wrap(raw.as_bytes(), proof).await?;
        self.metadata.put(&entry, codec::encode(&wrapped)).await?;
        info!(%pair, "Generated app key");
        Ok(raw)
    }

    async fn key_proof(&self, key_cipher: &KeyCipher) -> Result<Option<AuthProof>> {
        if key_cipher.requires_authentication() {
            self.gate.authorize(&self.prompt).await.map(Some)
        } else {
            Ok(None)
        }
    }
}
