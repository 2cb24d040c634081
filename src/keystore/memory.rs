//! # Memory Key Store
//!
//! In-process backend for development and tests. Instances created from the
//! registry share one process-wide map, so a value written through one
//! instance is immediately visible through another.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};
use std::time::Instant;
use zeroize::Zeroizing;

use super::{BackendOptions, KeyStore, KeyStoreConfig, KeyStoreError, KeyStoreFactory};
use crate::observability::metrics;

pub const MODE: &str = "memory";

type Backing = Arc<RwLock<HashMap<String, Zeroizing<Vec<u8>>>>>;

static SHARED: LazyLock<Backing> = LazyLock::new(Backing::default);

#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    entries: Backing,
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore").finish_non_exhaustive()
    }
}

impl MemoryKeyStore {
    /// A store with its own private map.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store over the process-wide map.
    pub fn shared() -> Self {
        Self {
            entries: Arc::clone(&SHARED),
        }
    }

    /// A second handle over the same map.
    pub fn sibling(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }

    /// Number of stored keys. Fails if a writer panicked while holding the map.
    pub fn len(&self) -> Result<usize, KeyStoreError> {
        self.entries
            .read()
            .map(|entries| entries.len())
            .map_err(|e| KeyStoreError::backend("len", "*", e))
    }

    pub fn is_empty(&self) -> Result<bool, KeyStoreError> {
        self.len().map(|len| len == 0)
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let start = Instant::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|e| KeyStoreError::backend("set", key, e))?;
        entries.insert(key.to_string(), Zeroizing::new(value.to_vec()));
        metrics::record_keystore_operation(MODE, "set", start.elapsed().as_secs_f64());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let start = Instant::now();
        let entries = self
            .entries
            .read()
            .map_err(|e| KeyStoreError::backend("get", key, e))?;
        let value = entries.get(key).cloned().ok_or_else(|| KeyStoreError::NotFound {
            key: key.to_string(),
        });
        metrics::record_keystore_operation(MODE, "get", start.elapsed().as_secs_f64());
        value
    }

    async fn test(&self, _key: &str) -> Result<(), KeyStoreError> {
        Ok(())
    }
}

pub struct Factory;

#[async_trait]
impl KeyStoreFactory for Factory {
    async fn create(
        &self,
        config: &KeyStoreConfig,
        _options: &BackendOptions,
    ) -> Result<Arc<dyn KeyStore>, KeyStoreError> {
        match config {
            KeyStoreConfig::Memory => Ok(Arc::new(MemoryKeyStore::shared())),
            other => Err(KeyStoreError::Config(format!(
                "memory factory cannot build '{}' backend",
                other.mode()
            ))),
        }
    }
}
