//! # Configurer
//!
//! Applies the external configuration mounted from the `<name>-configurer`
//! ConfigMap: ACL policies, auth methods and secrets engines. Runs as the
//! root token read from the key store. Existing auth methods and mounts are
//! left untouched, so repeated runs converge.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{MountRequest, VaultApi, VaultApiError};
use crate::keystore::{KeyStore, KeyStoreError, ROOT_TOKEN_KEY};

#[derive(Debug, Error)]
pub enum ConfigureError {
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("vault API error: {0}")]
    Vault(#[from] VaultApiError),

    #[error("failed to read configuration {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ExternalConfig {
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
    #[serde(default)]
    pub auth: Vec<AuthConfig>,
    #[serde(default)]
    pub secrets: Vec<SecretsEngineConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PolicyConfig {
    pub name: String,
    pub rules: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: String,
    /// Defaults to the auth type
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SecretsEngineConfig {
    #[serde(rename = "type")]
    pub engine_type: String,
    /// Defaults to the engine type
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl ExternalConfig {
    /// Parse YAML or JSON.
    pub fn parse(raw: &str) -> Result<Self, ConfigureError> {
        if raw.trim().is_empty() || raw.trim() == "null" {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| ConfigureError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigureError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigureError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&raw)
    }
}

/// What an [`Configurer::apply`] run changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigureSummary {
    pub policies_written: usize,
    pub auth_enabled: usize,
    pub auth_existing: usize,
    pub mounts_created: usize,
    pub mounts_existing: usize,
}

pub struct Configurer {
    vault: Arc<dyn VaultApi>,
    keystore: Arc<dyn KeyStore>,
}

fn mount_key(path: &str) -> String {
    format!("{}/", path.trim_matches('/'))
}

impl Configurer {
    pub fn new(vault: Arc<dyn VaultApi>, keystore: Arc<dyn KeyStore>) -> Self {
        Self { vault, keystore }
    }

    async fn root_token(&self) -> Result<Zeroizing<String>, ConfigureError> {
        let raw = self.keystore.get(ROOT_TOKEN_KEY).await?;
        let token = std::str::from_utf8(&raw).map_err(|e| KeyStoreError::Encoding {
            key: ROOT_TOKEN_KEY.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Zeroizing::new(token.trim().to_string()))
    }

    pub async fn apply(&self, config: &ExternalConfig) -> Result<ConfigureSummary, ConfigureError> {
        let token = self.root_token().await?;
        let mut summary = ConfigureSummary::default();

        for policy in &config.policies {
            self.vault
                .put_policy(&token, &policy.name, &policy.rules)
                .await?;
            info!("Policy written: {}", policy.name);
            summary.policies_written += 1;
        }

        if !config.auth.is_empty() {
            let existing = self.vault.list_auth(&token).await?;
            for auth in &config.auth {
                let path = auth.path.as_deref().unwrap_or(&auth.auth_type);
                if existing.contains_key(&mount_key(path)) {
                    debug!("Auth method already enabled at {}", path);
                    summary.auth_existing += 1;
                    continue;
                }
                let request = MountRequest {
                    mount_type: auth.auth_type.clone(),
                    description: auth.description.clone().unwrap_or_default(),
                    options: BTreeMap::new(),
                };
                self.vault.enable_auth(&token, path, &request).await?;
                info!("Auth method {} enabled at {}", auth.auth_type, path);
                summary.auth_enabled += 1;
            }
        }

        if !config.secrets.is_empty() {
            let existing = self.vault.list_mounts(&token).await?;
            for engine in &config.secrets {
                let path = engine.path.as_deref().unwrap_or(&engine.engine_type);
                if existing.contains_key(&mount_key(path)) {
                    debug!("Secrets engine already mounted at {}", path);
                    summary.mounts_existing += 1;
                    continue;
                }
                let request = MountRequest {
                    mount_type: engine.engine_type.clone(),
                    description: engine.description.clone().unwrap_or_default(),
                    options: engine.options.clone(),
                };
                self.vault.mount(&token, path, &request).await?;
                info!("Secrets engine {} mounted at {}", engine.engine_type, path);
                summary.mounts_created += 1;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::memory::MemoryKeyStore;
    use crate::vault::{MockVaultApi, MountInfo};

    const CONFIG: &str = r#"
policies:
  - name: allow_secrets
    rules: |
      path "secret/*" {
        capabilities = ["read"]
      }
auth:
  - type: kubernetes
  - type: token
secrets:
  - type: kv
    path: secret
    options:
      version: "2"
"#;

    async fn store_with_root_token() -> Arc<MemoryKeyStore> {
        let store = Arc::new(MemoryKeyStore::new());
        store.set(ROOT_TOKEN_KEY, b"s.root\n").await.unwrap();
        store
    }

    fn existing(paths: &[(&str, &str)]) -> BTreeMap<String, MountInfo> {
        paths
            .iter()
            .map(|(path, kind)| {
                (
                    path.to_string(),
                    MountInfo {
                        mount_type: kind.to_string(),
                        description: String::new(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_parse_yaml_config() {
        let config = ExternalConfig::parse(CONFIG).unwrap();
        assert_eq!(config.policies.len(), 1);
        assert_eq!(config.auth[0].auth_type, "kubernetes");
        assert_eq!(config.secrets[0].path.as_deref(), Some("secret"));
        assert_eq!(config.secrets[0].options["version"], "2");
    }

    #[test]
    fn test_parse_empty_config() {
        assert_eq!(ExternalConfig::parse("").unwrap(), ExternalConfig::default());
        assert_eq!(ExternalConfig::parse("{}").unwrap(), ExternalConfig::default());
    }

    #[tokio::test]
    async fn test_apply_skips_existing_mounts() {
        let store = store_with_root_token().await;
        let mut vault = MockVaultApi::new();
        vault
            .expect_put_policy()
            .times(1)
            .withf(|token, name, _| token == "s.root" && name == "allow_secrets")
            .returning(|_, _, _| Ok(()));
        vault
            .expect_list_auth()
            .times(1)
            .returning(|_| Ok(existing(&[("token/", "token")])));
        vault
            .expect_enable_auth()
            .times(1)
            .withf(|_, path, request| path == "kubernetes" && request.mount_type == "kubernetes")
            .returning(|_, _, _| Ok(()));
        vault
            .expect_list_mounts()
            .times(1)
            .returning(|_| Ok(existing(&[("sys/", "system")])));
        vault
            .expect_mount()
            .times(1)
            .withf(|_, path, request| path == "secret" && request.mount_type == "kv")
            .returning(|_, _, _| Ok(()));

        let configurer = Configurer::new(Arc::new(vault), store);
        let summary = configurer
            .apply(&ExternalConfig::parse(CONFIG).unwrap())
            .await
            .unwrap();

        assert_eq!(
            summary,
            ConfigureSummary {
                policies_written: 1,
                auth_enabled: 1,
                auth_existing: 1,
                mounts_created: 1,
                mounts_existing: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_apply_without_root_token_fails() {
        let mut vault = MockVaultApi::new();
        vault.expect_put_policy().never();
        let configurer = Configurer::new(Arc::new(vault), Arc::new(MemoryKeyStore::new()));
        let err = configurer
            .apply(&ExternalConfig::parse(CONFIG).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigureError::KeyStore(e) if e.is_not_found()));
    }
}
