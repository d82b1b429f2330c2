//! Namespace sessions.
//!
//! A session holds everything the worker knows about one namespace: its
//! stores, the negotiated algorithm pair, and the storage ciphers built so
//! far. Ciphers are built lazily so operations that never touch a value
//! (like `contains_key`) never touch the key store.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::algorithm::{negotiate, AlgorithmPair, AlgorithmRegistry};
use crate::auth::{AuthenticationGate, PromptInfo};
use crate::codec;
use crate::config::{StorageMode, StorageOptions};
use crate::key_cipher::KeyCipher;
use crate::migration::{Migration, MigrationReport};
use crate::platform::Platform;
use crate::storage_cipher::{CipherFactory, StorageCipher};
use sealbox_common::{NamespaceId, Result};
use sealbox_crypto::SecureKeyStore;
use sealbox_storage::KeyValueStore;

/// Live state of one namespace.
pub struct NamespaceSession {
    options: StorageOptions,
    namespace: NamespaceId,
    entries: Arc<dyn KeyValueStore>,
    metadata: Arc<dyn KeyValueStore>,
    registry: AlgorithmRegistry,
    factory: CipherFactory,
    saved_pair: AlgorithmPair,
    current_pair: AlgorithmPair,
    migrated: bool,
    last_migration: Option<MigrationReport>,
    current: Option<StorageCipher>,
    legacy: Option<StorageCipher>,
}

impl NamespaceSession {
    /// Open a namespace, running migration if it is due.
    ///
    /// With `reset_on_error`, a non-authentication failure clears the
    /// namespace and initialization is retried once.
    ///
    /// # Errors
    /// - `InvalidArgument` for invalid options
    /// - `AuthenticationFailed` / `OperationCancelled` from a prompt
    /// - `MigrationInitFailure` and key-store errors when no reset applies
    pub async fn open(
        options: StorageOptions,
        platform: &Platform,
        gate: Arc<AuthenticationGate>,
    ) -> Result<Self> {
        options.validate()?;
        let namespace = NamespaceId::new(options.namespace_name.clone())?;

        match Self::initialize(&options, &namespace, platform, gate.clone()).await {
            Ok(session) => Ok(session),
            Err(e) if e.is_authentication() || !options.reset_on_error => Err(e),
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Initialization failed, resetting namespace");
                let entries = Self::entries_store(&options, &namespace, platform)?;
                let metadata = platform.stores.open(&namespace.metadata_store_name())?;
                Self::clear_namespace(
                    &options,
                    platform.key_store.as_ref(),
                    namespace.as_str(),
                    entries.as_ref(),
                    metadata.as_ref(),
                )
                .await?;
                if options.storage_mode == StorageMode::Managed {
                    let legacy = platform.stores.open(namespace.as_str())?;
                    Self::remove_prefixed(&options, legacy.as_ref()).await?;
                }
                Self::initialize(&options, &namespace, platform, gate).await
            }
        }
    }

    fn entries_store(
        options: &StorageOptions,
        namespace: &NamespaceId,
        platform: &Platform,
    ) -> Result<Arc<dyn KeyValueStore>> {
        match options.storage_mode {
            StorageMode::Ciphertext => platform.stores.open(namespace.as_str()),
            StorageMode::Managed => platform.stores.open_managed(namespace.as_str()),
        }
    }

    async fn initialize(
        options: &StorageOptions,
        namespace: &NamespaceId,
        platform: &Platform,
        gate: Arc<AuthenticationGate>,
    ) -> Result<Self> {
        let entries = Self::entries_store(options, namespace, platform)?;
        let metadata = platform.stores.open(&namespace.metadata_store_name())?;
        let registry = AlgorithmRegistry::new(metadata.clone());

        let current_pair = negotiate(options.preferred_pair(), platform.key_store.tier());
        let mut saved_pair = registry.load_saved().await?;
        let mut migrated = registry.is_migrated(options.storage_mode).await?;

        let prompt = PromptInfo::from_options(options);
        if options.require_authentication && !current_pair.key.is_platform_bound() {
            // RSA keys cannot be gated per use; authenticate once per session.
            gate.authorize(&prompt).await?;
        }

        let factory = CipherFactory::new(
            platform.key_store.clone(),
            metadata.clone(),
            gate,
            prompt,
            namespace.as_str(),
            options.require_authentication,
        );

        let mut current = None;
        let mut last_migration = None;
        if Migration::is_due(options.storage_mode, saved_pair, current_pair, migrated) {
            let source = match options.storage_mode {
                StorageMode::Ciphertext => entries.clone(),
                StorageMode::Managed => platform.stores.open(namespace.as_str())?,
            };
            let outcome = Migration {
                options,
                registry: &registry,
                factory: &factory,
                source: source.as_ref(),
                target: entries.as_ref(),
            }
            .run(saved_pair, current_pair)
            .await?;

            migrated = outcome.report.completed;
            if migrated && options.storage_mode == StorageMode::Ciphertext {
                saved_pair = current_pair;
            }
            current = outcome.current;
            last_migration = Some(outcome.report);
        }

        debug!(namespace = %namespace, saved = %saved_pair, current = %current_pair, migrated, "Session open");
        Ok(Self {
            options: options.clone(),
            namespace: namespace.clone(),
            entries,
            metadata,
            registry,
            factory,
            saved_pair,
            current_pair,
            migrated,
            last_migration,
            current,
            legacy: None,
        })
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    /// Pair new data is written with.
    pub fn current_pair(&self) -> AlgorithmPair {
        self.current_pair
    }

    /// Pair recorded for the data on disk.
    pub fn saved_pair(&self) -> AlgorithmPair {
        self.saved_pair
    }

    pub fn is_migrated(&self) -> bool {
        self.migrated
    }

    /// Report of the migration run when this session opened, if any.
    pub fn last_migration(&self) -> Option<MigrationReport> {
        self.last_migration
    }

    /// Whether the storage cipher for new data has been built.
    pub fn has_cipher(&self) -> bool {
        self.current.is_some()
    }

    fn is_managed(&self) -> bool {
        self.options.storage_mode == StorageMode::Managed
    }

    fn has_legacy_data(&self) -> bool {
        !self.migrated && self.saved_pair != self.current_pair
    }

    async fn current_cipher(&mut self) -> Result<&StorageCipher> {
        let cipher = match self.current.take() {
            Some(cipher) => cipher,
            None => match self.factory.build(self.current_pair).await {
                Ok(cipher) => cipher,
                Err(e) if !e.is_authentication() && self.options.reset_on_error => {
                    warn!(namespace = %self.namespace, error = %e, "Cipher unavailable, resetting namespace");
                    self.reset().await?;
                    self.factory.build(self.current_pair).await?
                }
                Err(e) => return Err(e),
            },
        };
        Ok(self.current.insert(cipher))
    }

    async fn legacy_cipher(&mut self) -> Result<&StorageCipher> {
        let cipher = match self.legacy.take() {
            Some(cipher) => cipher,
            None => self.factory.build(self.saved_pair).await?,
        };
        Ok(self.legacy.insert(cipher))
    }

    async fn decrypt_value(&mut self, raw: &str) -> Result<String> {
        if self.is_managed() {
            return Ok(raw.to_string());
        }

        let blob = codec::decode(raw)?;
        if !self.has_legacy_data() {
            return self.current_cipher().await?.decrypt_text(&blob).await;
        }

        // Saved cipher first: CBC may accept a blob it did not produce.
        let attempt = match self.legacy_cipher().await {
            Ok(cipher) => cipher.decrypt_text(&blob).await,
            Err(e) => Err(e),
        };
        match attempt {
            Ok(value) => Ok(value),
            Err(e) if e.is_authentication() => Err(e),
            Err(e) => {
                debug!(namespace = %self.namespace, error = %e, "Not a legacy value, trying current cipher");
                match self.current_cipher().await?.decrypt_text(&blob).await {
                    Ok(value) => Ok(value),
                    Err(current_error) if current_error.is_authentication() => Err(current_error),
                    Err(_) => Err(e),
                }
            }
        }
    }

    /// Read the value stored under `key`.
    pub async fn read(&mut self, key: &str) -> Result<Option<String>> {
        match self.entries.get(&self.options.entry_key(key)).await? {
            Some(raw) => self.decrypt_value(&raw).await.map(Some),
            None => Ok(None),
        }
    }

    /// Store `value` under `key`, always with the current cipher.
    pub async fn write(&mut self, key: &str, value: &str) -> Result<()> {
        let stored = if self.is_managed() {
            value.to_string()
        } else {
            let blob = self.current_cipher().await?.encrypt(value.as_bytes()).await?;
            codec::encode(&blob)
        };
        self.entries.put(&self.options.entry_key(key), stored).await
    }

    /// Whether an entry exists under `key`. Never builds a cipher.
    pub async fn contains_key(&self, key: &str) -> Result<bool> {
        self.entries.contains(&self.options.entry_key(key)).await
    }

    /// Remove the entry under `key`.
    pub async fn delete(&mut self, key: &str) -> Result<()> {
        self.entries.remove(&self.options.entry_key(key)).await
    }

    /// Every readable entry of the namespace.
    ///
    /// Entries that fail to decrypt are skipped; prompts that fail or are
    /// cancelled abort the whole call.
    pub async fn read_all(&mut self) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        let stored = self.entries.entries().await?;
        for (entry_key, raw) in stored {
            let Some(key) = self.options.logical_key(&entry_key).map(str::to_string) else {
                continue;
            };
            match self.decrypt_value(&raw).await {
                Ok(value) => {
                    values.insert(key, value);
                }
                Err(e) if e.is_authentication() => return Err(e),
                Err(e) => warn!(namespace = %self.namespace, %key, error = %e, "Skipping unreadable entry"),
            }
        }
        Ok(values)
    }

    /// Remove every entry of the namespace. Metadata is kept.
    pub async fn delete_all(&mut self) -> Result<()> {
        let removed = Self::remove_prefixed(&self.options, self.entries.as_ref()).await?;
        info!(namespace = %self.namespace, removed, "Deleted all entries");
        Ok(())
    }

    /// Drop all entries, metadata, and keys and start over on the current pair.
    async fn reset(&mut self) -> Result<()> {
        Self::clear_namespace(
            &self.options,
            self.factory.key_store().as_ref(),
            self.factory.alias_prefix(),
            self.entries.as_ref(),
            self.metadata.as_ref(),
        )
        .await?;
        self.registry.persist(self.current_pair).await?;
        self.registry
            .set_migrated(self.options.storage_mode, true)
            .await?;
        self.saved_pair = self.current_pair;
        self.migrated = true;
        self.current = None;
        self.legacy = None;
        Ok(())
    }

    /// Keys go first: a locked key store aborts the reset before any data
    /// is removed.
    async fn clear_namespace(
        options: &StorageOptions,
        key_store: &dyn SecureKeyStore,
        alias_prefix: &str,
        entries: &dyn KeyValueStore,
        metadata: &dyn KeyValueStore,
    ) -> Result<()> {
        KeyCipher::delete_all(key_store, alias_prefix)?;
        let removed = Self::remove_prefixed(options, entries).await?;
        metadata.clear().await?;
        warn!(store = entries.name(), removed, "Namespace reset");
        Ok(())
    }

    async fn remove_prefixed(options: &StorageOptions, store: &dyn KeyValueStore) -> Result<usize> {
        let mut removed = 0;
        for key in store.entries().await?.into_keys() {
            if options.logical_key(&key).is_some() {
                store.remove(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{
        KeyCipherAlgorithm, StorageCipherAlgorithm, ALGORITHM_KEY_ENTRY, ALGORITHM_STORAGE_ENTRY,
    };
    use crate::auth::testing::ScriptedAuthenticator;
    use crate::auth::AuthOutcome;
    use crate::config::DEFAULT_NAMESPACE;
    use sealbox_common::{Error, PlatformTier};
    use sealbox_crypto::{AesKeySpec, SecureKeyStore, SoftwareKeyStore};
    use sealbox_storage::{MemoryStoreProvider, StoreProvider};

    fn platform(tier: PlatformTier) -> (Platform, Arc<SoftwareKeyStore>, Arc<MemoryStoreProvider>) {
        let key_store = Arc::new(SoftwareKeyStore::new(tier).with_rsa_bits(1024));
        let stores = Arc::new(MemoryStoreProvider::new());
        (Platform::new(key_store.clone(), stores.clone()), key_store, stores)
    }

    fn no_gate() -> Arc<AuthenticationGate> {
        Arc::new(AuthenticationGate::new(None))
    }

    fn gcm_options() -> StorageOptions {
        StorageOptions {
            key_cipher_algorithm: KeyCipherAlgorithm::RsaOaepSha256,
            storage_cipher_algorithm: StorageCipherAlgorithm::AesGcm,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let (platform, _, _) = platform(PlatformTier::SECURE_KEYSTORE);
        let mut session = NamespaceSession::open(gcm_options(), &platform, no_gate())
            .await
            .unwrap();

        assert_eq!(session.read("a").await.unwrap(), None);
        session.write("a", "secret").await.unwrap();
        assert_eq!(session.read("a").await.unwrap().as_deref(), Some("secret"));
        assert!(session.contains_key("a").await.unwrap());

        session.delete("a").await.unwrap();
        assert!(!session.contains_key("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_contains_key_builds_no_cipher() {
        let (platform, key_store, _) = platform(PlatformTier::SECURE_KEYSTORE);
        let session = NamespaceSession::open(gcm_options(), &platform, no_gate())
            .await
            .unwrap();

        assert!(!session.contains_key("missing").await.unwrap());
        assert!(!session.has_cipher());
        let alias = KeyCipher::alias_for(KeyCipherAlgorithm::RsaOaepSha256, DEFAULT_NAMESPACE, false);
        assert!(!key_store.contains_alias(&alias).unwrap());
    }

    #[tokio::test]
    async fn test_legacy_entry_readable_before_migration_completes() {
        let (platform, _, stores) = platform(PlatformTier::SECURE_KEYSTORE);
        {
            let mut legacy = NamespaceSession::open(StorageOptions::default(), &platform, no_gate())
                .await
                .unwrap();
            legacy.write("a", "secret1").await.unwrap();
        }

        // A corrupt sibling keeps migration from completing.
        let entries = stores.open(DEFAULT_NAMESPACE).unwrap();
        entries
            .put(&StorageOptions::default().entry_key("bad"), codec::encode(&[1u8; 3]))
            .await
            .unwrap();

        let mut session = NamespaceSession::open(gcm_options(), &platform, no_gate())
            .await
            .unwrap();
        assert!(!session.is_migrated());
        let report = session.last_migration().unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(session.read("a").await.unwrap().as_deref(), Some("secret1"));
    }

    #[tokio::test]
    async fn test_cross_generation_fallback_read() {
        let (platform, _, stores) = platform(PlatformTier::SECURE_KEYSTORE);
        let options = StorageOptions::default();
        {
            let mut legacy = NamespaceSession::open(options.clone(), &platform, no_gate())
                .await
                .unwrap();
            legacy.write("a", "secret1").await.unwrap();
        }

        // State between a platform upgrade and the migration pass.
        let metadata = stores.open("SecureStorage.metadata").unwrap();
        let registry = AlgorithmRegistry::new(metadata.clone());
        let factory = CipherFactory::new(
            platform.key_store.clone(),
            metadata.clone(),
            no_gate(),
            PromptInfo::from_options(&options),
            "SecureStorage",
            false,
        );
        let mut session = NamespaceSession {
            options: gcm_options(),
            namespace: NamespaceId::new("SecureStorage").unwrap(),
            entries: stores.open("SecureStorage").unwrap(),
            metadata,
            registry,
            factory,
            saved_pair: AlgorithmPair::OLDEST,
            current_pair: gcm_options().preferred_pair(),
            migrated: false,
            last_migration: None,
            current: None,
            legacy: None,
        };
        assert_eq!(session.read("a").await.unwrap().as_deref(), Some("secret1"));
    }

    #[tokio::test]
    async fn test_fallback_read_prefers_saved_cbc_cipher() {
        let (platform, _, stores) = platform(PlatformTier::SECURE_KEYSTORE);
        let options = StorageOptions::default();
        {
            let mut legacy = NamespaceSession::open(options.clone(), &platform, no_gate())
                .await
                .unwrap();
            for i in 0..500 {
                legacy.write(&format!("k{}", i), &format!("value-{}", i)).await.unwrap();
            }
        }

        let current = StorageOptions {
            key_cipher_algorithm: KeyCipherAlgorithm::RsaOaepSha256,
            ..Default::default()
        };
        let metadata = stores.open("SecureStorage.metadata").unwrap();
        let factory = CipherFactory::new(
            platform.key_store.clone(),
            metadata.clone(),
            no_gate(),
            PromptInfo::from_options(&options),
            "SecureStorage",
            false,
        );
        let mut session = NamespaceSession {
            options: current.clone(),
            namespace: NamespaceId::new("SecureStorage").unwrap(),
            entries: stores.open("SecureStorage").unwrap(),
            registry: AlgorithmRegistry::new(metadata.clone()),
            metadata,
            factory,
            saved_pair: AlgorithmPair::OLDEST,
            current_pair: current.preferred_pair(),
            migrated: false,
            last_migration: None,
            current: None,
            legacy: None,
        };

        let all = session.read_all().await.unwrap();
        assert_eq!(all.len(), 500);
        for i in 0..500 {
            assert_eq!(all[&format!("k{}", i)], format!("value-{}", i));
        }
    }

    #[tokio::test]
    async fn test_post_migration_write_uses_current_cipher() {
        let (platform, _, stores) = platform(PlatformTier::SECURE_KEYSTORE);
        {
            let mut legacy = NamespaceSession::open(StorageOptions::default(), &platform, no_gate())
                .await
                .unwrap();
            legacy.write("a", "secret1").await.unwrap();
        }

        let mut session = NamespaceSession::open(gcm_options(), &platform, no_gate())
            .await
            .unwrap();
        assert!(session.is_migrated());
        assert_eq!(session.saved_pair(), session.current_pair());
        session.write("a", "secret2").await.unwrap();

        let entries = stores.open("SecureStorage").unwrap();
        let raw = entries
            .get(&StorageOptions::default().entry_key("a"))
            .await
            .unwrap()
            .unwrap();
        let blob = codec::decode(&raw).unwrap();

        let metadata = stores.open("SecureStorage.metadata").unwrap();
        let factory = CipherFactory::new(
            platform.key_store.clone(),
            metadata,
            no_gate(),
            PromptInfo::from_options(&StorageOptions::default()),
            "SecureStorage",
            false,
        );
        let current = factory.build(gcm_options().preferred_pair()).await.unwrap();
        let saved = factory.build(AlgorithmPair::OLDEST).await.unwrap();
        assert_eq!(current.decrypt(&blob).await.unwrap(), b"secret2");
        assert!(saved.decrypt(&blob).await.map(|p| p != b"secret2").unwrap_or(true));
    }

    #[tokio::test]
    async fn test_read_all_skips_unreadable_entries() {
        let (platform, _, stores) = platform(PlatformTier::SECURE_KEYSTORE);
        let mut session = NamespaceSession::open(gcm_options(), &platform, no_gate())
            .await
            .unwrap();
        session.write("a", "1").await.unwrap();
        session.write("b", "2").await.unwrap();

        let entries = stores.open("SecureStorage").unwrap();
        entries
            .put(&gcm_options().entry_key("c"), codec::encode(&[0u8; 40]))
            .await
            .unwrap();
        entries.put("foreign", "x".to_string()).await.unwrap();

        let all = session.read_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("a").map(String::as_str), Some("1"));
        assert_eq!(all.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_delete_all_preserves_metadata_and_foreign_keys() {
        let (platform, _, stores) = platform(PlatformTier::SECURE_KEYSTORE);
        let mut session = NamespaceSession::open(gcm_options(), &platform, no_gate())
            .await
            .unwrap();
        session.write("a", "1").await.unwrap();
        let entries = stores.open("SecureStorage").unwrap();
        entries.put("foreign", "x".to_string()).await.unwrap();

        session.delete_all().await.unwrap();
        assert!(session.read_all().await.unwrap().is_empty());
        assert!(entries.contains("foreign").await.unwrap());

        let registry = AlgorithmRegistry::new(stores.open("SecureStorage.metadata").unwrap());
        assert_eq!(
            registry.load_saved().await.unwrap(),
            gcm_options().preferred_pair()
        );
    }

    #[tokio::test]
    async fn test_managed_mode_stores_plaintext() {
        let (platform, _, stores) = platform(PlatformTier::SECURE_KEYSTORE);
        {
            let mut legacy = NamespaceSession::open(StorageOptions::default(), &platform, no_gate())
                .await
                .unwrap();
            legacy.write("a", "secret1").await.unwrap();
        }

        let options = StorageOptions {
            storage_mode: StorageMode::Managed,
            ..Default::default()
        };
        let mut session = NamespaceSession::open(options.clone(), &platform, no_gate())
            .await
            .unwrap();
        assert_eq!(session.last_migration().unwrap().migrated, 1);
        assert_eq!(session.read("a").await.unwrap().as_deref(), Some("secret1"));

        session.write("b", "plain").await.unwrap();
        let managed = stores.open_managed("SecureStorage").unwrap();
        assert_eq!(
            managed.get(&options.entry_key("b")).await.unwrap().as_deref(),
            Some("plain")
        );
        assert!(!session.has_cipher());
        assert!(stores.open("SecureStorage").unwrap().entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_on_error_recovers_from_bad_record() {
        let (platform, _, stores) = platform(PlatformTier::SECURE_KEYSTORE);
        let metadata = stores.open("SecureStorage.metadata").unwrap();
        metadata
            .put(ALGORITHM_STORAGE_ENTRY, "ROT13".to_string())
            .await
            .unwrap();
        stores
            .open("SecureStorage")
            .unwrap()
            .put(&StorageOptions::default().entry_key("old"), "garbage".to_string())
            .await
            .unwrap();

        let err = NamespaceSession::open(gcm_options(), &platform, no_gate())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::MigrationInitFailure(_)));

        let options = StorageOptions {
            reset_on_error: true,
            ..gcm_options()
        };
        let mut session = NamespaceSession::open(options, &platform, no_gate())
            .await
            .unwrap();
        assert!(session.is_migrated());
        assert_eq!(session.read("old").await.unwrap(), None);
        session.write("new", "v").await.unwrap();
        assert_eq!(session.read("new").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_reset_on_error_replaces_broken_app_key() {
        let (platform, _, stores) = platform(PlatformTier::SECURE_KEYSTORE);
        let options = StorageOptions {
            reset_on_error: true,
            ..gcm_options()
        };
        let mut session = NamespaceSession::open(options, &platform, no_gate())
            .await
            .unwrap();
        session.write("a", "1").await.unwrap();
        drop(session);

        let metadata = stores.open("SecureStorage.metadata").unwrap();
        let entry = CipherFactory::wrapped_key_entry(gcm_options().preferred_pair());
        metadata.put(&entry, "not base64!".to_string()).await.unwrap();

        let options = StorageOptions {
            reset_on_error: true,
            ..gcm_options()
        };
        let mut session = NamespaceSession::open(options, &platform, no_gate())
            .await
            .unwrap();
        session.write("b", "2").await.unwrap();
        assert_eq!(session.read("a").await.unwrap(), None);
        assert_eq!(session.read("b").await.unwrap().as_deref(), Some("2"));
        assert!(metadata.contains(ALGORITHM_KEY_ENTRY).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_on_error_replaces_invalid_key() {
        let (platform, key_store, _) = platform(PlatformTier::SECURE_KEYSTORE);
        let alias = KeyCipher::alias_for(KeyCipherAlgorithm::RsaOaepSha256, DEFAULT_NAMESPACE, false);
        // The alias now holds a key of the wrong kind.
        key_store
            .generate_aes_key(&alias, AesKeySpec { auth_required: false })
            .unwrap();

        let mut session = NamespaceSession::open(gcm_options(), &platform, no_gate())
            .await
            .unwrap();
        assert!(session.write("a", "1").await.is_err());
        drop(session);

        let options = StorageOptions {
            reset_on_error: true,
            ..gcm_options()
        };
        let mut session = NamespaceSession::open(options, &platform, no_gate())
            .await
            .unwrap();
        session.write("a", "1").await.unwrap();
        assert_eq!(session.read("a").await.unwrap().as_deref(), Some("1"));
        assert!(key_store.rsa_public_key(&alias).is_ok());
    }

    #[tokio::test]
    async fn test_reset_on_error_deletes_namespace_keys() {
        let (platform, key_store, _) = platform(PlatformTier::SECURE_KEYSTORE);
        let options = StorageOptions {
            reset_on_error: true,
            key_cipher_algorithm: KeyCipherAlgorithm::AesGcmPlatform,
            storage_cipher_algorithm: StorageCipherAlgorithm::AesGcm,
            ..Default::default()
        };
        let mut session = NamespaceSession::open(options, &platform, no_gate())
            .await
            .unwrap();
        session.write("a", "1").await.unwrap();
        session.reset().await.unwrap();

        let alias = KeyCipher::alias_for(KeyCipherAlgorithm::AesGcmPlatform, DEFAULT_NAMESPACE, false);
        assert!(!key_store.contains_alias(&alias).unwrap());
        assert_eq!(session.read("a").await.unwrap(), None);
        session.write("b", "2").await.unwrap();
        assert!(key_store.contains_alias(&alias).unwrap());
    }

    #[tokio::test]
    async fn test_reset_on_error_keeps_data_while_key_store_locked() {
        let (platform, key_store, _) = platform(PlatformTier::SECURE_KEYSTORE);
        let options = StorageOptions {
            reset_on_error: true,
            ..gcm_options()
        };
        let mut session = NamespaceSession::open(options.clone(), &platform, no_gate())
            .await
            .unwrap();
        session.write("a", "1").await.unwrap();
        drop(session);

        key_store.set_available(false);
        let mut session = NamespaceSession::open(options, &platform, no_gate())
            .await
            .unwrap();
        assert!(matches!(
            session.read("a").await,
            Err(Error::KeyStoreUnavailable(_))
        ));

        key_store.set_available(true);
        assert_eq!(session.read("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_cipher_build_retried_after_key_store_unlocks() {
        let (platform, key_store, _) = platform(PlatformTier::SECURE_KEYSTORE);
        let mut session = NamespaceSession::open(gcm_options(), &platform, no_gate())
            .await
            .unwrap();

        key_store.set_available(false);
        assert!(matches!(
            session.write("a", "1").await,
            Err(Error::KeyStoreUnavailable(_))
        ));

        key_store.set_available(true);
        session.write("a", "1").await.unwrap();
        assert_eq!(session.read("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_rsa_require_authentication_prompts_at_open() {
        let (platform, _, _) = platform(PlatformTier::SECURE_KEYSTORE);
        let authenticator = Arc::new(
            ScriptedAuthenticator::always(AuthOutcome::Authenticated)
                .then([AuthOutcome::Denied("no".to_string())]),
        );
        let gate = Arc::new(AuthenticationGate::new(Some(authenticator.clone())));
        let options = StorageOptions {
            require_authentication: true,
            ..gcm_options()
        };

        let err = NamespaceSession::open(options.clone(), &platform, gate.clone())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::AuthenticationFailed(_)));

        let mut session = NamespaceSession::open(options, &platform, gate).await.unwrap();
        session.write("a", "1").await.unwrap();
        assert_eq!(authenticator.prompts(), 2);
    }

    #[tokio::test]
    async fn test_biometric_read_denied_then_retried() {
        let (platform, _, _) = platform(PlatformTier::SECURE_KEYSTORE);
        let authenticator = Arc::new(
            ScriptedAuthenticator::always(AuthOutcome::Authenticated)
                .then([AuthOutcome::Authenticated, AuthOutcome::Denied("no".to_string())]),
        );
        let gate = Arc::new(AuthenticationGate::new(Some(authenticator.clone())));
        let options = StorageOptions {
            key_cipher_algorithm: KeyCipherAlgorithm::AesGcmPlatform,
            storage_cipher_algorithm: StorageCipherAlgorithm::AesGcmBiometric,
            ..Default::default()
        };
        let mut session = NamespaceSession::open(options, &platform, gate).await.unwrap();

        session.write("a", "bio").await.unwrap();
        let before = session.entries.entries().await.unwrap();

        assert!(matches!(
            session.read("a").await,
            Err(Error::AuthenticationFailed(_))
        ));
        assert_eq!(session.entries.entries().await.unwrap(), before);

        assert_eq!(session.read("a").await.unwrap().as_deref(), Some("bio"));
        assert_eq!(authenticator.prompts(), 3);
    }
}
