//! Per-namespace storage options.
//!
//! Options arrive from the method-call layer as a loosely typed map. They
//! are parsed once per request and compared against the options a cached
//! session was built with.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::algorithm::{AlgorithmPair, KeyCipherAlgorithm, StorageCipherAlgorithm};
use sealbox_common::{Error, Result};

/// Default namespace (store) name.
pub const DEFAULT_NAMESPACE: &str = "SecureStorage";

/// Default entry prefix.
pub const DEFAULT_KEY_PREFIX: &str = "VGhpcyBpcyB0aGUgcHJlZml4IGZvciBhIHNlY3VyZSBzdG9yYWdlCg";

/// Default authentication prompt title.
pub const DEFAULT_PROMPT_TITLE: &str = "Authenticate to access";

/// Default authentication prompt subtitle.
pub const DEFAULT_PROMPT_SUBTITLE: &str = "Use biometrics or device credentials";

/// Where entry values live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Base64 ciphertext produced by the storage cipher, in a plain store.
    #[default]
    Ciphertext,
    /// Plaintext in a store the platform encrypts transparently.
    Managed,
}

impl StorageMode {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ciphertext" => Some(Self::Ciphertext),
            "managed" => Some(Self::Managed),
            _ => None,
        }
    }
}

/// Options for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageOptions {
    /// Name of the underlying store.
    pub namespace_name: String,
    /// Prefix scoping entries inside the store.
    pub key_prefix: String,
    /// Clear the namespace and retry once when initialization fails. Also
    /// makes migration drop entries it cannot re-encrypt.
    pub reset_on_error: bool,
    /// Require user authentication before the namespace is used.
    pub require_authentication: bool,
    /// Preferred key cipher.
    #[serde(alias = "preferredKeyAlgorithm")]
    pub key_cipher_algorithm: KeyCipherAlgorithm,
    /// Preferred storage cipher.
    #[serde(alias = "preferredStorageAlgorithm")]
    pub storage_cipher_algorithm: StorageCipherAlgorithm,
    /// Ciphertext or managed store.
    pub storage_mode: StorageMode,
    /// Title of the authentication prompt.
    pub biometric_prompt_title: String,
    /// Subtitle of the authentication prompt.
    pub biometric_prompt_subtitle: String,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            namespace_name: DEFAULT_NAMESPACE.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            reset_on_error: false,
            require_authentication: false,
            key_cipher_algorithm: KeyCipherAlgorithm::default(),
            storage_cipher_algorithm: StorageCipherAlgorithm::default(),
            storage_mode: StorageMode::default(),
            biometric_prompt_title: DEFAULT_PROMPT_TITLE.to_string(),
            biometric_prompt_subtitle: DEFAULT_PROMPT_SUBTITLE.to_string(),
        }
    }
}

impl StorageOptions {
    /// Parse a loosely typed options map.
    ///
    /// Booleans may be given as `"true"`/`"false"` strings and empty strings
    /// select the default. `null` yields the defaults.
    ///
    /// # Errors
    /// - `InvalidArgument` for a non-object value, a mistyped field, or an
    ///   unknown algorithm or mode name
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "Options must be a map, got {}",
                    other
                )))
            }
        };

        let mut options = Self::default();

        if let Some(name) = string_field(map, &["namespaceName"])? {
            options.namespace_name = name;
        }
        if let Some(prefix) = string_field(map, &["keyPrefix"])? {
            options.key_prefix = prefix;
        }
        if let Some(flag) = bool_field(map, "resetOnError")? {
            options.reset_on_error = flag;
        }
        if let Some(flag) = bool_field(map, "requireAuthentication")? {
            options.require_authentication = flag;
        }
        if let Some(tag) = string_field(map, &["keyCipherAlgorithm", "preferredKeyAlgorithm"])? {
            options.key_cipher_algorithm = KeyCipherAlgorithm::from_tag(&tag).ok_or_else(|| {
                Error::InvalidArgument(format!("Unknown key cipher algorithm: {}", tag))
            })?;
        }
        if let Some(tag) =
            string_field(map, &["storageCipherAlgorithm", "preferredStorageAlgorithm"])?
        {
            options.storage_cipher_algorithm =
                StorageCipherAlgorithm::from_tag(&tag).ok_or_else(|| {
                    Error::InvalidArgument(format!("Unknown storage cipher algorithm: {}", tag))
                })?;
        }
        if let Some(mode) = string_field(map, &["storageMode"])? {
            options.storage_mode = StorageMode::from_name(&mode).ok_or_else(|| {
                Error::InvalidArgument(format!("Unknown storage mode: {}", mode))
            })?;
        }
        if let Some(title) = string_field(map, &["biometricPromptTitle"])? {
            options.biometric_prompt_title = title;
        }
        if let Some(subtitle) = string_field(map, &["biometricPromptSubtitle"])? {
            options.biometric_prompt_subtitle = subtitle;
        }

        options.validate()?;
        Ok(options)
    }

    /// Check field combinations.
    ///
    /// # Errors
    /// - `InvalidArgument` for an empty namespace or prefix
    /// - `InvalidArgument` for the biometric storage cipher without the
    ///   platform-bound key cipher
    pub fn validate(&self) -> Result<()> {
        if self.namespace_name.is_empty() {
            return Err(Error::InvalidArgument("Namespace name is empty".to_string()));
        }
        if self.key_prefix.is_empty() {
            return Err(Error::InvalidArgument("Key prefix is empty".to_string()));
        }
        if !self.preferred_pair().is_coherent() {
            return Err(Error::InvalidArgument(format!(
                "{} requires the {} key cipher",
                self.storage_cipher_algorithm,
                KeyCipherAlgorithm::AesGcmPlatform
            )));
        }
        Ok(())
    }

    /// The caller's preferred algorithm pair.
    pub fn preferred_pair(&self) -> AlgorithmPair {
        AlgorithmPair::new(self.key_cipher_algorithm, self.storage_cipher_algorithm)
    }

    /// Store key for a logical entry key.
    pub fn entry_key(&self, key: &str) -> String {
        format!("{}_{}", self.key_prefix, key)
    }

    /// Logical key for a store key, if it belongs to this namespace.
    pub fn logical_key<'a>(&self, entry_key: &'a str) -> Option<&'a str> {
        entry_key
            .strip_prefix(self.key_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
    }
}

fn string_field(map: &Map<String, Value>, names: &[&str]) -> Result<Option<String>> {
    for name in names {
        match map.get(*name) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.is_empty() => continue,
            Some(Value::String(s)) => return Ok(Some(s.clone())),
            Some(other) => {
                return Err(Error::InvalidArgument(format!(
                    "Option '{}' must be a string, got {}",
                    name, other
                )))
            }
        }
    }
    Ok(None)
}

fn bool_field(map: &Map<String, Value>, name: &str) -> Result<Option<bool>> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(other) => Err(Error::InvalidArgument(format!(
            "Option '{}' must be a boolean, got {}",
            name, other
        ))),
    }
}
