//! Local file-backed store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::provider::{KeyValueStore, StoreProvider};
use sealbox_common::{Error, Result};

/// Store persisted as a single JSON object on disk.
///
/// Every mutation rewrites the file through a temporary sibling and an
/// atomic rename, so a crash leaves either the old or the new state.
pub struct FileStore {
    name: String,
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    /// - Parent directory cannot be created
    /// - Existing file is not a JSON object of strings
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let entries = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)
                .map_err(|e| Error::Storage(format!("Corrupt store file {}: {}", path.display(), e)))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            name: name.into(),
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let bytes = serde_json::to_vec(entries)
            .map_err(|e| Error::Storage(format!("Failed to encode store: {}", e)))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &self.path).await?;
        debug!(store = %self.name, entries = entries.len(), "Store persisted");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.persist(&entries).await {
            // Keep memory consistent with disk.
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(old) = entries.remove(key) {
            if let Err(e) = self.persist(&entries).await {
                entries.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn entries(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.entries.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write().await;
        let empty = BTreeMap::new();
        self.persist(&empty).await?;
        *entries = empty;
        Ok(())
    }
}

/// Provider storing each named store as `<root>/<name>.json`.
pub struct FileStoreProvider {
    root: PathBuf,
    open_stores: Mutex<HashMap<String, Arc<FileStore>>>,
}

impl FileStoreProvider {
    /// Create a provider rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            open_stores: Mutex::new(HashMap::new()),
        })
    }

    /// Provider rooted in the user's local data directory under `app_id`.
    pub fn in_data_dir(app_id: &str) -> Result<Self> {
        let base = dirs::data_local_dir().ok_or_else(|| {
            Error::Storage("No local data directory on this platform".to_string())
        })?;
        Self::new(base.join(app_id))
    }

    fn store_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::InvalidArgument(format!(
                "Invalid store name: {:?}",
                name
            )));
        }
        Ok(self.root.join(format!("{}.json", name)))
    }
}

impl StoreProvider for FileStoreProvider {
    fn name(&self) -> &str {
        "file"
    }

    fn open(&self, name: &str) -> Result<Arc<dyn KeyValueStore>> {
        let mut open_stores = self
            .open_stores
            .lock()
            .map_err(|_| Error::Storage("Store table poisoned".to_string()))?;

        if let Some(store) = open_stores.get(name) {
            return Ok(store.clone());
        }

        let store = Arc::new(FileStore::open(name, self.store_path(name)?)?);
        open_stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    fn open_managed(&self, name: &str) -> Result<Arc<dyn KeyValueStore>> {
        Err(Error::PlatformCapabilityUnsupported(format!(
            "File provider has no managed encrypted store for '{}'",
            name
        )))
    }
}
