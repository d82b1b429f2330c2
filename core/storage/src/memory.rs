//! In-memory stores for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::provider::{KeyValueStore, StoreProvider};
use sealbox_common::{Error, Result};

/// In-memory key-value store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
pub struct MemoryStore {
    name: String,
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn entries(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.entries.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// Provider handing out shared in-memory stores by name.
///
/// Managed stores are kept apart from plain stores of the same name. They
/// do not encrypt anything; they only stand in for a platform store that
/// would.
#[derive(Default)]
pub struct MemoryStoreProvider {
    plain: Mutex<HashMap<String, Arc<MemoryStore>>>,
    managed: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryStoreProvider {
    /// Create a provider with no stores.
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(
        stores: &Mutex<HashMap<String, Arc<MemoryStore>>>,
        name: &str,
    ) -> Result<Arc<dyn KeyValueStore>> {
        let mut stores = stores
            .lock()
            .map_err(|_| Error::Storage("Store table poisoned".to_string()))?;
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(name)))
            .clone();
        Ok(store)
    }
}

impl StoreProvider for MemoryStoreProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self, name: &str) -> Result<Arc<dyn KeyValueStore>> {
        Self::get_or_create(&self.plain, name)
    }

    fn open_managed(&self, name: &str) -> Result<Arc<dyn KeyValueStore>> {
        Self::get_or_create(&self.managed, name)
    }
}
