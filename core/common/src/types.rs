//! Common types used throughout Sealbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Identifier of an isolated key-value namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceId(String);

impl NamespaceId {
    /// Create a new NamespaceId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidArgument(
                "Namespace name cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the dedicated store holding this namespace's metadata.
    pub fn metadata_store_name(&self) -> String {
        format!("{}.metadata", self.0)
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordinal capability level of the host platform.
///
/// Higher tiers are newer platforms. Algorithms declare the minimum tier
/// they need; anything at or above it may use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlatformTier(pub u32);

impl PlatformTier {
    /// Every platform supports baseline algorithms.
    pub const BASELINE: Self = Self(0);

    /// Platforms whose key store can hold symmetric keys and run AES-GCM.
    pub const SECURE_KEYSTORE: Self = Self(23);

    /// Whether this platform satisfies `required`.
    pub fn supports(&self, required: PlatformTier) -> bool {
        *self >= required
    }
}

impl Default for PlatformTier {
    fn default() -> Self {
        Self::BASELINE
    }
}

impl fmt::Display for PlatformTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.0)
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}
