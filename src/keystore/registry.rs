//! # Key Store Registry
//!
//! Maps backend mode names to factories. The unsealer builds one registry at
//! startup and asks it for the backend named by its configuration.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{aws, etcd, gcs_kms, kubernetes, memory};
use super::{BackendOptions, KeyStore, KeyStoreConfig, KeyStoreError};

/// Builds a backend from its configuration.
#[async_trait]
pub trait KeyStoreFactory: Send + Sync {
    async fn create(
        &self,
        config: &KeyStoreConfig,
        options: &BackendOptions,
    ) -> Result<Arc<dyn KeyStore>, KeyStoreError>;
}

pub struct KeyStoreRegistry {
    factories: BTreeMap<&'static str, Box<dyn KeyStoreFactory>>,
}

impl std::fmt::Debug for KeyStoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStoreRegistry")
            .field("modes", &self.modes())
            .finish()
    }
}

impl Default for KeyStoreRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl KeyStoreRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with every built-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(kubernetes::MODE, Box::new(kubernetes::Factory));
        registry.register(gcs_kms::MODE, Box::new(gcs_kms::Factory));
        registry.register(aws::MODE, Box::new(aws::Factory));
        registry.register(etcd::MODE, Box::new(etcd::Factory));
        registry.register(memory::MODE, Box::new(memory::Factory));
        registry
    }

    /// Register `factory` under `mode`, replacing any previous one.
    pub fn register(&mut self, mode: &'static str, factory: Box<dyn KeyStoreFactory>) {
        self.factories.insert(mode, factory);
    }

    pub fn modes(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Build the backend selected by `config`.
    pub async fn build(
        &self,
        config: &KeyStoreConfig,
        options: &BackendOptions,
    ) -> Result<Arc<dyn KeyStore>, KeyStoreError> {
        let mode = config.mode();
        let factory = self.factories.get(mode).ok_or_else(|| {
            KeyStoreError::Config(format!(
                "unknown key store mode '{mode}', expected one of: {}",
                self.modes().join(", ")
            ))
        })?;
        factory.create(config, options).await
    }
}
