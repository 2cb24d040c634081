//! # Kubernetes Secret Key Store
//!
//! Stores every key as a data entry of one Secret. Intended for development:
//! anyone who can read Secrets in the namespace can read the unseal keys.
//!
//! The Secret is created on the first `set`. When `K8S_OWNER_REFERENCE` holds
//! a serialized owner reference it is attached, so the Secret is garbage
//! collected with the `Vault` resource.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use zeroize::Zeroizing;

use super::{BackendOptions, KeyStore, KeyStoreConfig, KeyStoreError, KeyStoreFactory};
use crate::constants::{ENV_K8S_OWNER_REFERENCE, FIELD_MANAGER};
use crate::observability::metrics;

pub const MODE: &str = "k8s";

pub struct KubernetesKeyStore {
    api: Api<Secret>,
    namespace: String,
    secret_name: String,
    owner: Option<OwnerReference>,
}

impl std::fmt::Debug for KubernetesKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesKeyStore")
            .field("namespace", &self.namespace)
            .field("secret_name", &self.secret_name)
            .finish_non_exhaustive()
    }
}

impl KubernetesKeyStore {
    pub fn new(
        client: Client,
        namespace: &str,
        secret_name: &str,
        owner: Option<OwnerReference>,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            secret_name: secret_name.to_string(),
            owner,
        }
    }

    async fn read_secret(&self, key: &str, operation: &'static str) -> Result<Option<Secret>, KeyStoreError> {
        self.api
            .get_opt(&self.secret_name)
            .await
            .map_err(|e| {
                metrics::increment_keystore_operation_errors(MODE);
                KeyStoreError::backend(operation, key, e)
            })
    }

    fn new_secret(&self, key: &str, value: &[u8]) -> Secret {
        let mut data = BTreeMap::new();
        data.insert(key.to_string(), ByteString(value.to_vec()));
        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name.clone()),
                namespace: Some(self.namespace.clone()),
                owner_references: self.owner.clone().map(|owner| vec![owner]),
                ..ObjectMeta::default()
            },
            data: Some(data),
            ..Secret::default()
        }
    }

    async fn patch_entry(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        use base64::Engine;
        let patch = serde_json::json!({
            "data": { key: base64::engine::general_purpose::STANDARD.encode(value) }
        });
        self.api
            .patch(
                &self.secret_name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| {
                metrics::increment_keystore_operation_errors(MODE);
                KeyStoreError::backend("set", key, e)
            })?;
        Ok(())
    }
}

/// Owner reference handed to the sidecar by the operator, if any.
pub fn owner_reference_from_env() -> Result<Option<OwnerReference>, KeyStoreError> {
    match std::env::var(ENV_K8S_OWNER_REFERENCE) {
        Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map(Some).map_err(|e| {
            KeyStoreError::Config(format!("invalid {ENV_K8S_OWNER_REFERENCE}: {e}"))
        }),
        _ => Ok(None),
    }
}

#[async_trait]
impl KeyStore for KubernetesKeyStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let span = info_span!(
            "keystore.k8s.set",
            secret.namespace = %self.namespace,
            secret.name = %self.secret_name,
            key = key
        );
        let start = Instant::now();

        async move {
            if self.read_secret(key, "set").await?.is_some() {
                self.patch_entry(key, value).await?;
            } else {
                info!("Creating key store secret {}/{}", self.namespace, self.secret_name);
                match self
                    .api
                    .create(&PostParams::default(), &self.new_secret(key, value))
                    .await
                {
                    Ok(_) => {}
                    // Lost a race with another writer; fall back to patching.
                    Err(kube::Error::Api(ae)) if ae.code == 409 => {
                        self.patch_entry(key, value).await?;
                    }
                    Err(e) => {
                        metrics::increment_keystore_operation_errors(MODE);
                        return Err(KeyStoreError::backend("set", key, e));
                    }
                }
            }
            metrics::record_keystore_operation(MODE, "set", start.elapsed().as_secs_f64());
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let span = tracing::debug_span!(
            "keystore.k8s.get",
            secret.namespace = %self.namespace,
            secret.name = %self.secret_name,
            key = key
        );
        let start = Instant::now();

        async move {
            let secret = self.read_secret(key, "get").await?;
            metrics::record_keystore_operation(MODE, "get", start.elapsed().as_secs_f64());
            let value = secret
                .and_then(|secret| secret.data)
                .and_then(|mut data| data.remove(key))
                .ok_or_else(|| KeyStoreError::NotFound {
                    key: key.to_string(),
                })?;
            Ok(Zeroizing::new(value.0))
        }
        .instrument(span)
        .await
    }

    async fn test(&self, key: &str) -> Result<(), KeyStoreError> {
        let exists = self.read_secret(key, "test").await?.is_some();
        debug!(
            "Key store secret {}/{} reachable (exists: {})",
            self.namespace, self.secret_name, exists
        );
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
        let KeyStoreConfig::Kubernetes {
            namespace,
            secret_name,
        } = config
        else {
            return Err(KeyStoreError::Config(format!(
                "k8s factory cannot build '{}' backend",
                config.mode()
            )));
        };
        let client = Client::try_default()
            .await
            .map_err(|e| KeyStoreError::Config(format!("failed to create Kubernetes client: {e}")))?;
        let owner = owner_reference_from_env()?;
        Ok(Arc::new(KubernetesKeyStore::new(
            client,
            namespace,
            secret_name,
            owner,
        )))
    }
}
