//! Storage worker and the public facade.
//!
//! All operations run on one worker task that owns every namespace session,
//! so no two cryptographic operations ever race. Callers talk to it through
//! a cloneable [`SecureStorage`] handle over a request channel.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::auth::AuthenticationGate;
use crate::config::StorageOptions;
use crate::platform::Platform;
use crate::session::NamespaceSession;
use sealbox_common::{Error, Result};

/// Queue depth of the request channel.
const REQUEST_QUEUE: usize = 64;

/// Operations served by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Read { key: String },
    Write { key: String, value: String },
    Delete { key: String },
    DeleteAll,
    ReadAll,
    ContainsKey { key: String },
    /// Stop the worker after answering.
    Shutdown,
}

/// Worker replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Value(Option<String>),
    All(BTreeMap<String, String>),
    Exists(bool),
    Done,
}

type Job = (StorageOptions, Request, oneshot::Sender<Result<Response>>);

/// Handle to the storage worker.
#[derive(Clone)]
pub struct SecureStorage {
    request_tx: mpsc::Sender<Job>,
    gate: Arc<AuthenticationGate>,
}

impl SecureStorage {
    /// Create a handle and the worker it talks to.
    ///
    /// The worker must be driven with [`StorageWorker::run`].
    pub fn new(platform: Platform) -> (Self, StorageWorker) {
        let gate = Arc::new(AuthenticationGate::new(platform.authenticator.clone()));
        Self::with_gate(platform, gate)
    }

    /// Like [`new`](Self::new) with a preconfigured gate.
    pub fn with_gate(platform: Platform, gate: Arc<AuthenticationGate>) -> (Self, StorageWorker) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);

        let storage = Self {
            request_tx,
            gate: gate.clone(),
        };
        let worker = StorageWorker {
            platform,
            gate,
            request_rx,
            sessions: HashMap::new(),
        };
        (storage, worker)
    }

    /// Create a handle and spawn its worker on the current runtime.
    pub fn spawn(platform: Platform) -> Self {
        let (storage, worker) = Self::new(platform);
        tokio::spawn(worker.run());
        storage
    }

    async fn call(&self, options: &StorageOptions, request: Request) -> Result<Response> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((options.clone(), request, response_tx))
            .await
            .map_err(|_| Error::Storage("Storage worker not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Storage("Storage worker dropped the request".to_string()))?
    }

    fn unexpected(response: Response) -> Error {
        Error::Storage(format!("Unexpected worker response: {:?}", response))
    }

    /// Read the value under `key`.
    pub async fn read(&self, options: &StorageOptions, key: &str) -> Result<Option<String>> {
        match self.call(options, Request::Read { key: key.to_string() }).await? {
            Response::Value(value) => Ok(value),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Store `value` under `key`.
    pub async fn write(&self, options: &StorageOptions, key: &str, value: &str) -> Result<()> {
        let request = Request::Write {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.call(options, request).await.map(|_| ())
    }

    /// Remove the entry under `key`.
    pub async fn delete(&self, options: &StorageOptions, key: &str) -> Result<()> {
        self.call(options, Request::Delete { key: key.to_string() })
            .await
            .map(|_| ())
    }

    /// Remove every entry of the namespace.
    pub async fn delete_all(&self, options: &StorageOptions) -> Result<()> {
        self.call(options, Request::DeleteAll).await.map(|_| ())
    }

    /// Every readable entry of the namespace.
    pub async fn read_all(&self, options: &StorageOptions) -> Result<BTreeMap<String, String>> {
        match self.call(options, Request::ReadAll).await? {
            Response::All(values) => Ok(values),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Whether an entry exists under `key`.
    pub async fn contains_key(&self, options: &StorageOptions, key: &str) -> Result<bool> {
        match self
            .call(options, Request::ContainsKey { key: key.to_string() })
            .await?
        {
            Response::Exists(exists) => Ok(exists),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Cancel the authentication prompt in flight, if any.
    ///
    /// The operation waiting on it fails with `OperationCancelled`.
    pub fn cancel_authentication(&self) -> bool {
        self.gate.cancel()
    }

    /// Stop the worker once queued requests are served.
    pub async fn shutdown(&self) {
        let _ = self
            .call(&StorageOptions::default(), Request::Shutdown)
            .await;
    }

    /// Method-call entry point.
    ///
    /// `arguments` is a map with an optional `options` map plus `key` and
    /// `value` where the method needs them. Results are `null`, a string, a
    /// boolean, or a map of strings.
    ///
    /// # Errors
    /// - `InvalidArgument` for an unknown method or a missing argument
    pub async fn dispatch(&self, method: &str, arguments: &Value) -> Result<Value> {
        let options = StorageOptions::from_value(arguments.get("options").unwrap_or(&Value::Null))?;
        debug!(method, namespace = %options.namespace_name, "Dispatching");

        match method {
            "read" => {
                let key = required_string(arguments, "key")?;
                Ok(self.read(&options, key).await?.map_or(Value::Null, Value::String))
            }
            "write" => {
                let key = required_string(arguments, "key")?;
                let value = required_string(arguments, "value")?;
                self.write(&options, key, value).await?;
                Ok(Value::Null)
            }
            "delete" => {
                let key = required_string(arguments, "key")?;
                self.delete(&options, key).await?;
                Ok(Value::Null)
            }
            "deleteAll" => {
                self.delete_all(&options).await?;
                Ok(Value::Null)
            }
            "readAll" => {
                let values = self.read_all(&options).await?;
                Ok(Value::Object(
                    values
                        .into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect(),
                ))
            }
            "containsKey" => {
                let key = required_string(arguments, "key")?;
                Ok(Value::Bool(self.contains_key(&options, key).await?))
            }
            other => Err(Error::InvalidArgument(format!("Unknown method: {}", other))),
        }
    }
}

fn required_string<'a>(arguments: &'a Value, name: &str) -> Result<&'a str> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidArgument(format!("Missing argument '{}'", name)))
}

/// Background task owning the namespace sessions.
pub struct StorageWorker {
    platform: Platform,
    gate: Arc<AuthenticationGate>,
    request_rx: mpsc::Receiver<Job>,
    sessions: HashMap<String, NamespaceSession>,
}

impl StorageWorker {
    /// Serve requests until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Storage worker started");

        while let Some((options, request, response_tx)) = self.request_rx.recv().await {
            if request == Request::Shutdown {
                info!("Received shutdown request");
                let _ = response_tx.send(Ok(Response::Done));
                break;
            }
            let result = self.handle(options, request).await;
            let _ = response_tx.send(result);
        }

        info!("Storage worker stopped");
    }

    async fn handle(&mut self, options: StorageOptions, request: Request) -> Result<Response> {
        let session = self.session(options).await?;

        match request {
            Request::Read { key } => session.read(&key).await.map(Response::Value),
            Request::Write { key, value } => session.write(&key, &value).await.map(|_| Response::Done),
            Request::Delete { key } => session.delete(&key).await.map(|_| Response::Done),
            Request::DeleteAll => session.delete_all().await.map(|_| Response::Done),
            Request::ReadAll => session.read_all().await.map(Response::All),
            Request::ContainsKey { key } => session.contains_key(&key).await.map(Response::Exists),
            Request::Shutdown => Ok(Response::Done),
        }
    }

    /// Session for the namespace of `options`, (re)built when needed.
    ///
    /// Building a session is the first-call barrier: migration finishes
    /// before the request that triggered it is served.
    async fn session(&mut self, options: StorageOptions) -> Result<&mut NamespaceSession> {
        let name = options.namespace_name.clone();

        let stale = self
            .sessions
            .get(&name)
            .map_or(true, |session| session.options() != &options);
        if stale {
            // Drop the old session first so a failed rebuild is retried next call.
            self.sessions.remove(&name);
            let session = NamespaceSession::open(options, &self.platform, self.gate.clone()).await?;
            if let Some(report) = session.last_migration() {
                info!(namespace = %name, migrated = report.migrated, failed = report.failed, "Namespace migrated");
            }
            self.sessions.insert(name.clone(), session);
        }

        self.sessions
            .get_mut(&name)
            .ok_or_else(|| Error::Storage(format!("No session for namespace '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{AlgorithmRegistry, KeyCipherAlgorithm, StorageCipherAlgorithm};
    use crate::auth::testing::ScriptedAuthenticator;
    use crate::auth::AuthOutcome;
    use crate::codec;
    use crate::config::StorageMode;
    use crate::storage_cipher::CipherFactory;
    use sealbox_common::PlatformTier;
    use sealbox_crypto::SoftwareKeyStore;
    use sealbox_storage::{FileStoreProvider, KeyValueStore, MemoryStoreProvider, StoreProvider};
    use serde_json::json;
    use std::time::Duration;

    fn test_platform(tier: PlatformTier) -> (Platform, Arc<MemoryStoreProvider>) {
        let stores = Arc::new(MemoryStoreProvider::new());
        let platform = Platform::new(
            Arc::new(SoftwareKeyStore::new(tier).with_rsa_bits(1024)),
            stores.clone(),
        );
        (platform, stores)
    }

    fn gcm_options() -> StorageOptions {
        StorageOptions {
            key_cipher_algorithm: KeyCipherAlgorithm::RsaOaepSha256,
            storage_cipher_algorithm: StorageCipherAlgorithm::AesGcm,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_facade_operations() {
        let (platform, _) = test_platform(PlatformTier::SECURE_KEYSTORE);
        let storage = SecureStorage::spawn(platform);
        let options = gcm_options();

        assert!(!storage.contains_key(&options, "missing").await.unwrap());
        storage.write(&options, "a", "1").await.unwrap();
        storage.write(&options, "b", "2").await.unwrap();
        assert_eq!(storage.read(&options, "a").await.unwrap().as_deref(), Some("1"));
        assert!(storage.contains_key(&options, "b").await.unwrap());

        storage.delete(&options, "a").await.unwrap();
        let all = storage.read_all(&options).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("b").map(String::as_str), Some("2"));

        storage.delete_all(&options).await.unwrap();
        assert!(storage.read_all(&options).await.unwrap().is_empty());

        storage.shutdown().await;
        assert!(storage.read(&options, "a").await.is_err());
    }

    #[tokio::test]
    async fn test_platform_upgrade_migrates_on_first_read() {
        let key_store = Arc::new(SoftwareKeyStore::new(PlatformTier(18)).with_rsa_bits(1024));
        let stores = Arc::new(MemoryStoreProvider::new());
        let platform = Platform::new(key_store.clone(), stores.clone());
        let options = gcm_options();

        // The preferred pair is out of reach: values land under the oldest pair.
        let before = SecureStorage::spawn(platform.clone());
        before.write(&options, "a", "secret1").await.unwrap();
        before.write(&options, "b", "secret2").await.unwrap();
        before.shutdown().await;

        let metadata = stores.open("SecureStorage.metadata").unwrap();
        let registry = AlgorithmRegistry::new(metadata.clone());
        assert_eq!(
            registry.load_saved().await.unwrap(),
            crate::algorithm::AlgorithmPair::OLDEST
        );

        key_store.set_tier(PlatformTier::SECURE_KEYSTORE);
        let storage = SecureStorage::spawn(platform.clone());
        assert_eq!(
            storage.read(&options, "a").await.unwrap().as_deref(),
            Some("secret1")
        );
        assert_eq!(registry.load_saved().await.unwrap(), options.preferred_pair());
        assert!(registry.is_migrated(StorageMode::Ciphertext).await.unwrap());

        // Stored blobs now open under the current cipher.
        let factory = CipherFactory::new(
            platform.key_store.clone(),
            metadata,
            Arc::new(AuthenticationGate::new(None)),
            crate::auth::PromptInfo::from_options(&options),
            "SecureStorage",
            false,
        );
        let gcm = factory.build(options.preferred_pair()).await.unwrap();
        let entries = stores.open("SecureStorage").unwrap();
        for (key, expected) in [("a", "secret1"), ("b", "secret2")] {
            let raw = entries.get(&options.entry_key(key)).await.unwrap().unwrap();
            let plaintext = gcm.decrypt(&codec::decode(&raw).unwrap()).await.unwrap();
            assert_eq!(plaintext, expected.as_bytes());
        }

        assert_eq!(
            storage.read_all(&options).await.unwrap(),
            BTreeMap::from([
                ("a".to_string(), "secret1".to_string()),
                ("b".to_string(), "secret2".to_string()),
            ])
        );
    }

    #[tokio::test]
    async fn test_changed_preference_rebuilds_session() {
        let (platform, stores) = test_platform(PlatformTier::SECURE_KEYSTORE);
        let storage = SecureStorage::spawn(platform);

        let legacy = StorageOptions::default();
        storage.write(&legacy, "a", "secret1").await.unwrap();

        let current = gcm_options();
        assert_eq!(
            storage.read(&current, "a").await.unwrap().as_deref(),
            Some("secret1")
        );
        let registry = AlgorithmRegistry::new(stores.open("SecureStorage.metadata").unwrap());
        assert_eq!(registry.load_saved().await.unwrap(), current.preferred_pair());
    }

    #[tokio::test]
    async fn test_old_platform_falls_back_to_oldest_pair() {
        let (platform, stores) = test_platform(PlatformTier(18));
        let storage = SecureStorage::spawn(platform);

        storage.write(&gcm_options(), "a", "1").await.unwrap();
        assert_eq!(
            storage.read(&gcm_options(), "a").await.unwrap().as_deref(),
            Some("1")
        );

        let registry = AlgorithmRegistry::new(stores.open("SecureStorage.metadata").unwrap());
        assert_eq!(
            registry.load_saved().await.unwrap(),
            crate::algorithm::AlgorithmPair::OLDEST
        );
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let (platform, _) = test_platform(PlatformTier::SECURE_KEYSTORE);
        let storage = SecureStorage::spawn(platform);
        let first = StorageOptions {
            namespace_name: "First".to_string(),
            ..gcm_options()
        };
        let second = StorageOptions {
            namespace_name: "Second".to_string(),
            ..Default::default()
        };

        storage.write(&first, "k", "one").await.unwrap();
        storage.write(&second, "k", "two").await.unwrap();
        assert_eq!(storage.read(&first, "k").await.unwrap().as_deref(), Some("one"));
        assert_eq!(storage.read(&second, "k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_dispatch() {
        let (platform, _) = test_platform(PlatformTier::SECURE_KEYSTORE);
        let storage = SecureStorage::spawn(platform);
        let options = json!({
            "keyCipherAlgorithm": "RSA_ECB_OAEPwithSHA_256andMGF1Padding",
            "storageCipherAlgorithm": "AES_GCM_NoPadding",
            "resetOnError": "true"
        });

        let written = storage
            .dispatch("write", &json!({ "key": "k", "value": "v", "options": options }))
            .await
            .unwrap();
        assert_eq!(written, Value::Null);

        let read = storage
            .dispatch("read", &json!({ "key": "k", "options": options }))
            .await
            .unwrap();
        assert_eq!(read, json!("v"));

        let missing = storage
            .dispatch("read", &json!({ "key": "nope", "options": options }))
            .await
            .unwrap();
        assert_eq!(missing, Value::Null);

        let exists = storage
            .dispatch("containsKey", &json!({ "key": "k", "options": options }))
            .await
            .unwrap();
        assert_eq!(exists, json!(true));

        let all = storage
            .dispatch("readAll", &json!({ "options": options }))
            .await
            .unwrap();
        assert_eq!(all, json!({ "k": "v" }));

        storage
            .dispatch("deleteAll", &json!({ "options": options }))
            .await
            .unwrap();
        let all = storage
            .dispatch("readAll", &json!({ "options": options }))
            .await
            .unwrap();
        assert_eq!(all, json!({}));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_bad_calls() {
        let (platform, _) = test_platform(PlatformTier::SECURE_KEYSTORE);
        let storage = SecureStorage::spawn(platform);

        for (method, arguments) in [
            ("read", json!({})),
            ("write", json!({ "key": "k" })),
            ("delete", json!({ "key": 5 })),
            ("format", json!({})),
            ("read", json!({ "key": "k", "options": { "storageMode": "cloud" } })),
        ] {
            let err = storage.dispatch(method, &arguments).await.unwrap_err();
            assert_eq!(err.kind().code(), "INVALID_ARGUMENT", "{} {}", method, arguments);
        }
    }

    #[tokio::test]
    async fn test_cancel_in_flight_authentication() {
        let (platform, _) = test_platform(PlatformTier::SECURE_KEYSTORE);
        let platform = platform.with_authenticator(Arc::new(
            ScriptedAuthenticator::always(AuthOutcome::Authenticated)
                .with_delay(Duration::from_secs(30)),
        ));
        let storage = SecureStorage::spawn(platform);
        let options = StorageOptions {
            require_authentication: true,
            ..gcm_options()
        };

        let pending = {
            let storage = storage.clone();
            let options = options.clone();
            tokio::spawn(async move { storage.read(&options, "a").await })
        };

        let mut cancelled = false;
        for _ in 0..1000 {
            if storage.cancel_authentication() {
                cancelled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(cancelled);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::OperationCancelled(_)));
    }

    #[tokio::test]
    async fn test_authentication_denied_then_retry_prompts_again() {
        let authenticator = Arc::new(
            ScriptedAuthenticator::always(AuthOutcome::Authenticated)
                .then([AuthOutcome::Denied("cancelled by user".to_string())]),
        );
        let (platform, _) = test_platform(PlatformTier::SECURE_KEYSTORE);
        let storage = SecureStorage::spawn(platform.with_authenticator(authenticator.clone()));
        let options = StorageOptions {
            require_authentication: true,
            ..gcm_options()
        };

        let err = storage.write(&options, "a", "1").await.unwrap_err();
        assert_eq!(err.kind().code(), "AUTHENTICATION_FAILED");
        assert!(!storage.contains_key(&options, "a").await.unwrap());
        assert_eq!(authenticator.prompts(), 2);

        storage.write(&options, "a", "1").await.unwrap();
        assert_eq!(storage.read(&options, "a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_file_backed_namespace_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let key_store = Arc::new(SoftwareKeyStore::new(PlatformTier::SECURE_KEYSTORE).with_rsa_bits(1024));
        let options = gcm_options();

        {
            let platform = Platform::new(
                key_store.clone(),
                Arc::new(FileStoreProvider::new(dir.path()).unwrap()),
            );
            let storage = SecureStorage::spawn(platform);
            storage.write(&options, "token", "abc").await.unwrap();
            storage.shutdown().await;
        }

        let platform = Platform::new(key_store, Arc::new(FileStoreProvider::new(dir.path()).unwrap()));
        let storage = SecureStorage::spawn(platform);
        assert_eq!(
            storage.read(&options, "token").await.unwrap().as_deref(),
            Some("abc")
        );
        assert!(dir.path().join("SecureStorage.metadata.json").exists());
    }
}
