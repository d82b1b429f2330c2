//! Host platform services the engine runs against.

use std::sync::Arc;

use crate::auth::Authenticator;
use sealbox_common::PlatformTier;
use sealbox_crypto::{SecureKeyStore, SoftwareKeyStore};
use sealbox_storage::{MemoryStoreProvider, StoreProvider};

/// Key store, key-value stores, and prompt of the host platform.
#[derive(Clone)]
pub struct Platform {
    pub key_store: Arc<dyn SecureKeyStore>,
    pub stores: Arc<dyn StoreProvider>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl Platform {
    /// Platform without an authentication prompt.
    pub fn new(key_store: Arc<dyn SecureKeyStore>, stores: Arc<dyn StoreProvider>) -> Self {
        Self {
            key_store,
            stores,
            authenticator: None,
        }
    }

    /// Attach the platform prompt.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Software key store over in-memory stores. Nothing persists.
    pub fn in_memory(tier: PlatformTier) -> Self {
        Self::new(
            Arc::new(SoftwareKeyStore::new(tier)),
            Arc::new(MemoryStoreProvider::new()),
        )
    }
}
