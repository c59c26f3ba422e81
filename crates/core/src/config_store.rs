//! Configuration store port.
//!
//! Secrets such as the field encryption key live in an external
//! configuration store and are fetched on demand. The core never caches a
//! value beyond the call that needed it.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::error::CoreResult;

/// A secret configuration value, wiped from memory on drop.
pub type SecretValue = Zeroizing<String>;

/// Key under which the field encryption key is stored.
pub const ENCRYPTION_KEY: &str = "encryption.key";

/// Read access to named configuration values, plus provisioning writes.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> CoreResult<Option<SecretValue>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: SecretValue) -> CoreResult<()>;
}

/// A process-local configuration store.
#[derive(Default)]
pub struct InMemoryConfigStore {
    values: RwLock<HashMap<String, SecretValue>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with one value.
    pub fn with_value(key: &str, value: impl Into<String>) -> Self {
        let store = Self::new();
        store
            .values
            .write()
            .insert(key.to_string(), Zeroizing::new(value.into()));
        store
    }

    /// Removes a value. Used to simulate an unprovisioned store.
    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryConfigStore {
    async fn get(&self, key: &str) -> CoreResult<Option<SecretValue>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: SecretValue) -> CoreResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryConfigStore")
            .field("keys", &self.values.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
