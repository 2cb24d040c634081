//! # Key Store
//!
//! Durable storage for Vault's unseal key shares and root token.
//!
//! Every backend implements [`KeyStore`]: `set`, `get` and a `test`
//! reachability check. A key that was never written yields
//! [`KeyStoreError::NotFound`], which callers treat differently from a
//! backend failure. Backends never retry; the unseal loop owns retries.
//!
//! Logical keys are `vault-root` and `vault-unseal-<i>`; the physical name in
//! a backend is `prefix + key`.
//!
//! Backends are selected by mode name through [`KeyStoreRegistry`]:
//!
//! - `k8s`: Kubernetes Secret (development only)
//! - `google-cloud-kms-gcs`: GCS objects encrypted with Cloud KMS
//! - `aws-secrets-manager`: AWS Secrets Manager
//! - `etcd`: etcd v3 JSON gateway
//! - `memory`: process-local map (development and tests)

pub mod aws;
pub mod etcd;
pub mod gcs_kms;
pub mod kubernetes;
pub mod memory;
pub mod registry;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

pub use registry::{KeyStoreFactory, KeyStoreRegistry};

/// Logical key of the root token
pub const ROOT_TOKEN_KEY: &str = "vault-root";

/// Key used by the reachability check before init
pub const TEST_KEY: &str = "vault-test";

/// Logical key of the `index`th unseal share
pub fn unseal_key_name(index: u32) -> String {
    format!("vault-unseal-{index}")
}

/// Physical object name of `key` under `prefix`
pub fn object_name_with_prefix(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

/// Key store errors
///
/// Messages carry key names only, never values.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key '{key}' not found")]
    NotFound { key: String },

    #[error("{operation} failed for key '{key}': {reason}")]
    Backend {
        operation: &'static str,
        key: String,
        reason: String,
    },

    #[error("invalid value stored under '{key}': {reason}")]
    Encoding { key: String, reason: String },

    #[error("invalid key store configuration: {0}")]
    Config(String),
}

impl KeyStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KeyStoreError::NotFound { .. })
    }

    pub(crate) fn backend(operation: &'static str, key: &str, reason: impl std::fmt::Display) -> Self {
        KeyStoreError::Backend {
            operation,
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Uniform contract over the key store backends.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Write `value` under `key`. Visible to any subsequent `get`.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError>;

    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError>;

    /// Check that the backend is reachable. Does not require `key` to exist.
    async fn test(&self, key: &str) -> Result<(), KeyStoreError>;
}

/// Backend selection, built once from unsealer arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreConfig {
    Kubernetes {
        namespace: String,
        secret_name: String,
    },
    GoogleKmsGcs {
        kms_project: String,
        kms_location: String,
        kms_key_ring: String,
        kms_crypto_key: String,
        bucket: String,
        prefix: String,
    },
    AwsSecretsManager {
        region: String,
        kms_key_id: Option<String>,
        prefix: String,
    },
    Etcd {
        endpoint: String,
        prefix: String,
    },
    Memory,
}

impl KeyStoreConfig {
    /// Registry mode name of this backend
    pub fn mode(&self) -> &'static str {
        match self {
            KeyStoreConfig::Kubernetes { .. } => kubernetes::MODE,
            KeyStoreConfig::GoogleKmsGcs { .. } => gcs_kms::MODE,
            KeyStoreConfig::AwsSecretsManager { .. } => aws::MODE,
            KeyStoreConfig::Etcd { .. } => etcd::MODE,
            KeyStoreConfig::Memory => memory::MODE,
        }
    }
}

/// Options shared by every backend
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Client-side timeout for each backend call
    pub timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::constants::DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}
