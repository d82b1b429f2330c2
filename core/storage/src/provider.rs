//! Key-value store trait definitions.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use sealbox_common::Result;

/// Flat string-keyed store with atomic single-key commits.
///
/// This is the persistence substrate beneath the engine: the equivalent of a
/// simple preferences file. Implementations must make each `put` and
/// `remove` durable on its own; there are no cross-key transactions.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the store name.
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite `key`.
    ///
    /// # Postconditions
    /// - The new value is durable when this returns
    async fn put(&self, key: &str, value: String) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Check if `key` is present.
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Snapshot of every entry in the store.
    async fn entries(&self) -> Result<BTreeMap<String, String>>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;
}

/// Opens named stores.
///
/// Opening the same name twice must yield views of the same data.
pub trait StoreProvider: Send + Sync {
    /// Get the provider name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Open a plain store. Values are persisted as given.
    fn open(&self, name: &str) -> Result<Arc<dyn KeyValueStore>>;

    /// Open a store whose backend encrypts every entry transparently.
    ///
    /// Callers write plaintext into such a store and must not add their own
    /// encryption layer on top.
    fn open_managed(&self, name: &str) -> Result<Arc<dyn KeyValueStore>>;
}
