//! Algorithm identifiers, negotiation, and the persisted algorithm record.
//!
//! A namespace remembers which (key cipher, storage cipher) pair produced
//! its stored data. The "saved" pair is what is on disk; the "current" pair
//! is the best the platform offers right now. When they differ, the
//! migration engine re-encrypts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::StorageMode;
use sealbox_common::{Error, PlatformTier, Result};
use sealbox_crypto::RsaPadding;
use sealbox_storage::KeyValueStore;

/// Metadata key holding the saved key cipher tag.
pub const ALGORITHM_KEY_ENTRY: &str = "SecureStorageAlgorithmKey";

/// Metadata key holding the saved storage cipher tag.
pub const ALGORITHM_STORAGE_ENTRY: &str = "SecureStorageAlgorithmStorage";

/// Metadata key holding the migrated flag of a ciphertext-mode namespace.
pub const MIGRATED_ENTRY: &str = "preferencesMigrated";

/// Metadata key holding the migrated flag of a managed-mode namespace.
pub const MANAGED_MIGRATED_ENTRY: &str = "preferencesMigrated.managed";

/// Key cipher variants, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KeyCipherAlgorithm {
    /// RSA key pair, PKCS#1 v1.5 wrapping.
    #[default]
    #[serde(rename = "RSA_ECB_PKCS1Padding")]
    RsaPkcs1,
    /// RSA key pair, OAEP with SHA-256 and MGF1.
    #[serde(rename = "RSA_ECB_OAEPwithSHA_256andMGF1Padding")]
    RsaOaepSha256,
    /// AES key that never leaves the platform key store.
    #[serde(rename = "AES_GCM_NoPadding")]
    AesGcmPlatform,
}

impl KeyCipherAlgorithm {
    /// Every variant, oldest first.
    pub const ALL: [Self; 3] = [Self::RsaPkcs1, Self::RsaOaepSha256, Self::AesGcmPlatform];

    /// Persisted tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RsaPkcs1 => "RSA_ECB_PKCS1Padding",
            Self::RsaOaepSha256 => "RSA_ECB_OAEPwithSHA_256andMGF1Padding",
            Self::AesGcmPlatform => "AES_GCM_NoPadding",
        }
    }

    /// Parse a persisted tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.tag() == tag)
    }

    /// Lowest platform tier able to run this variant.
    pub fn min_tier(&self) -> PlatformTier {
        match self {
            Self::RsaPkcs1 => PlatformTier::BASELINE,
            Self::RsaOaepSha256 | Self::AesGcmPlatform => PlatformTier::SECURE_KEYSTORE,
        }
    }

    /// RSA padding for wrap-based variants.
    pub fn rsa_padding(&self) -> Option<RsaPadding> {
        match self {
            Self::RsaPkcs1 => Some(RsaPadding::Pkcs1v15),
            Self::RsaOaepSha256 => Some(RsaPadding::OaepSha256),
            Self::AesGcmPlatform => None,
        }
    }

    /// Whether the key material stays inside the key store.
    pub fn is_platform_bound(&self) -> bool {
        matches!(self, Self::AesGcmPlatform)
    }
}

impl fmt::Display for KeyCipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Storage cipher variants, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StorageCipherAlgorithm {
    /// AES-128-CBC with PKCS#7 padding under a wrapped app key.
    #[default]
    #[serde(rename = "AES_CBC_PKCS7Padding")]
    AesCbcPkcs7,
    /// AES-256-GCM.
    #[serde(rename = "AES_GCM_NoPadding")]
    AesGcm,
    /// AES-256-GCM under a platform key that needs a fresh proof per use.
    #[serde(rename = "AES_GCM_NoPadding_BIOMETRIC")]
    AesGcmBiometric,
}

impl StorageCipherAlgorithm {
    /// Every variant, oldest first.
    pub const ALL: [Self; 3] = [Self::AesCbcPkcs7, Self::AesGcm, Self::AesGcmBiometric];

    /// Persisted tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AesCbcPkcs7 => "AES_CBC_PKCS7Padding",
            Self::AesGcm => "AES_GCM_NoPadding",
            Self::AesGcmBiometric => "AES_GCM_NoPadding_BIOMETRIC",
        }
    }

    /// Parse a persisted tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.tag() == tag)
    }

    /// Lowest platform tier able to run this variant.
    pub fn min_tier(&self) -> PlatformTier {
        match self {
            Self::AesCbcPkcs7 => PlatformTier::BASELINE,
            Self::AesGcm | Self::AesGcmBiometric => PlatformTier::SECURE_KEYSTORE,
        }
    }

    /// Whether ciphertext carries an authentication tag.
    ///
    /// Only authenticated variants reliably reject blobs they did not produce.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::AesCbcPkcs7)
    }
}

impl fmt::Display for StorageCipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A (key cipher, storage cipher) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AlgorithmPair {
    pub key: KeyCipherAlgorithm,
    pub storage: StorageCipherAlgorithm,
}

impl AlgorithmPair {
    /// The pair every namespace starts with.
    pub const OLDEST: Self = Self {
        key: KeyCipherAlgorithm::RsaPkcs1,
        storage: StorageCipherAlgorithm::AesCbcPkcs7,
    };

    pub fn new(key: KeyCipherAlgorithm, storage: StorageCipherAlgorithm) -> Self {
        Self { key, storage }
    }

    /// Whether both halves run on `tier`.
    pub fn is_supported_on(&self, tier: PlatformTier) -> bool {
        tier.supports(self.key.min_tier()) && tier.supports(self.storage.min_tier())
    }

    /// Whether the halves can be combined at all.
    ///
    /// The biometric storage cipher gates a platform-bound key; RSA key
    /// ciphers have nothing to gate.
    pub fn is_coherent(&self) -> bool {
        self.storage != StorageCipherAlgorithm::AesGcmBiometric || self.key.is_platform_bound()
    }
}

impl fmt::Display for AlgorithmPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.key, self.storage)
    }
}

/// Pick the pair to write with on this platform.
///
/// Returns `preferred` when the platform supports both halves, otherwise
/// falls back to [`AlgorithmPair::OLDEST`]. Never fails.
pub fn negotiate(preferred: AlgorithmPair, tier: PlatformTier) -> AlgorithmPair {
    if preferred.is_supported_on(tier) && preferred.is_coherent() {
        return preferred;
    }

    let reason = Error::PlatformCapabilityUnsupported(format!(
        "{} needs tier {}, platform is {}",
        preferred,
        preferred.key.min_tier().0.max(preferred.storage.min_tier().0),
        tier
    ));
    info!(%reason, fallback = %AlgorithmPair::OLDEST, "Preferred algorithm unavailable");
    AlgorithmPair::OLDEST
}

/// True iff data written under `saved` must be re-encrypted to be `current`.
pub fn requires_re_encryption(saved: AlgorithmPair, current: AlgorithmPair) -> bool {
    saved != current
}

/// Persisted algorithm record and migrated flag of one namespace.
pub struct AlgorithmRegistry {
    metadata: Arc<dyn KeyValueStore>,
}

impl AlgorithmRegistry {
    /// Registry over a namespace's dedicated metadata store.
    pub fn new(metadata: Arc<dyn KeyValueStore>) -> Self {
        Self { metadata }
    }

    /// Read the saved pair, defaulting each missing half to the oldest variant.
    ///
    /// # Errors
    /// - `MigrationInitFailure` if a persisted tag is not recognised
    pub async fn load_saved(&self) -> Result<AlgorithmPair> {
        let key = match self.metadata.get(ALGORITHM_KEY_ENTRY).await? {
            Some(tag) => KeyCipherAlgorithm::from_tag(&tag).ok_or_else(|| {
                Error::MigrationInitFailure(format!("Unknown key cipher tag: {}", tag))
            })?,
            None => AlgorithmPair::OLDEST.key,
        };
        let storage = match self.metadata.get(ALGORITHM_STORAGE_ENTRY).await? {
            Some(tag) => StorageCipherAlgorithm::from_tag(&tag).ok_or_else(|| {
                Error::MigrationInitFailure(format!("Unknown storage cipher tag: {}", tag))
            })?,
            None => AlgorithmPair::OLDEST.storage,
        };
        Ok(AlgorithmPair { key, storage })
    }

    /// Record `pair` as the algorithm that produced the stored data.
    pub async fn persist(&self, pair: AlgorithmPair) -> Result<()> {
        self.metadata
            .put(ALGORITHM_KEY_ENTRY, pair.key.tag().to_string())
            .await?;
        self.metadata
            .put(ALGORITHM_STORAGE_ENTRY, pair.storage.tag().to_string())
            .await?;
        debug!(store = self.metadata.name(), %pair, "Algorithm record persisted");
        Ok(())
    }

    /// Remove both algorithm tags.
    pub async fn clear(&self) -> Result<()> {
        self.metadata.remove(ALGORITHM_KEY_ENTRY).await?;
        self.metadata.remove(ALGORITHM_STORAGE_ENTRY).await
    }

    fn migrated_entry(mode: StorageMode) -> &'static str {
        match mode {
            StorageMode::Ciphertext => MIGRATED_ENTRY,
            StorageMode::Managed => MANAGED_MIGRATED_ENTRY,
        }
    }

    /// Whether migration into `mode` has run to an accepted end.
    pub async fn is_migrated(&self, mode: StorageMode) -> Result<bool> {
        let flag = self.metadata.get(Self::migrated_entry(mode)).await?;
        Ok(flag.as_deref() == Some("true"))
    }

    /// Set the migrated flag for `mode`.
    pub async fn set_migrated(&self, mode: StorageMode, migrated: bool) -> Result<()> {
        self.metadata
            .put(Self::migrated_entry(mode), migrated.to_string())
            .await
    }
}
