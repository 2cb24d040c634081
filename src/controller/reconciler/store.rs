//! # Object Store
//!
//! The reconciler's view of the cluster API: create, get and update of the
//! objects it manages, pod listing and `Vault` status writes.
//! [`KubeObjectStore`] maps HTTP 409 on create to
//! [`CreateOutcome::AlreadyExists`] and HTTP 404 to [`StoreError::NotFound`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{EtcdCluster, Vault, VaultStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Secret,
    EtcdCluster,
    Deployment,
    Service,
    ConfigMap,
}

impl ObjectKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "Secret",
            ObjectKind::EtcdCluster => "EtcdCluster",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Service => "Service",
            ObjectKind::ConfigMap => "ConfigMap",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every object kind the reconciler manages
#[derive(Debug, Clone)]
pub enum ManagedObject {
    Secret(Secret),
    EtcdCluster(EtcdCluster),
    Deployment(Deployment),
    Service(Service),
    ConfigMap(ConfigMap),
}

impl ManagedObject {
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::Secret(_) => ObjectKind::Secret,
            ManagedObject::EtcdCluster(_) => ObjectKind::EtcdCluster,
            ManagedObject::Deployment(_) => ObjectKind::Deployment,
            ManagedObject::Service(_) => ObjectKind::Service,
            ManagedObject::ConfigMap(_) => ObjectKind::ConfigMap,
        }
    }

    fn meta(&self) -> &kube::api::ObjectMeta {
        match self {
            ManagedObject::Secret(o) => o.meta(),
            ManagedObject::EtcdCluster(o) => o.meta(),
            ManagedObject::Deployment(o) => o.meta(),
            ManagedObject::Service(o) => o.meta(),
            ManagedObject::ConfigMap(o) => o.meta(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or("default")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ObjectKind,
        namespace: String,
        name: String,
    },

    #[error("{operation} {kind} {name} failed: {source}")]
    Kube {
        operation: &'static str,
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("expected {expected}, got {actual}")]
    UnexpectedKind {
        expected: ObjectKind,
        actual: ObjectKind,
    },
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `object`. An existing object of the same kind and name is success.
    async fn create(&self, object: &ManagedObject) -> Result<CreateOutcome, StoreError>;

    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<ManagedObject, StoreError>;

    /// Replace a previously fetched object.
    async fn update(&self, object: &ManagedObject) -> Result<(), StoreError>;

    async fn list_pod_names(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, StoreError>;

    async fn update_status(&self, vault: &Vault, status: &VaultStatus) -> Result<(), StoreError>;
}

/// [`ObjectStore`] over the Kubernetes API
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create_in<K>(&self, kind: ObjectKind, object: &K) -> Result<CreateOutcome, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let namespace = object.namespace().unwrap_or_else(|| "default".to_string());
        match self
            .api::<K>(&namespace)
            .create(&PostParams::default(), object)
            .await
        {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("{} {}/{} already exists", kind, namespace, object.name_any());
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(source) => Err(StoreError::Kube {
                operation: "create",
                kind: kind.as_str(),
                name: object.name_any(),
                source,
            }),
        }
    }

    async fn get_in<K>(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<K, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        match self.api::<K>(namespace).get(name).await {
            Ok(object) => Ok(object),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(StoreError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(source) => Err(StoreError::Kube {
                operation: "get",
                kind: kind.as_str(),
                name: name.to_string(),
                source,
            }),
        }
    }

    async fn replace_in<K>(&self, kind: ObjectKind, object: &K) -> Result<(), StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let namespace = object.namespace().unwrap_or_else(|| "default".to_string());
        let name = object.name_any();
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|source| StoreError::Kube {
                operation: "update",
                kind: kind.as_str(),
                name,
                source,
            })?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn create(&self, object: &ManagedObject) -> Result<CreateOutcome, StoreError> {
        let kind = object.kind();
        match object {
            ManagedObject::Secret(o) => self.create_in(kind, o).await,
            ManagedObject::EtcdCluster(o) => self.create_in(kind, o).await,
            ManagedObject::Deployment(o) => self.create_in(kind, o).await,
            ManagedObject::Service(o) => self.create_in(kind, o).await,
            ManagedObject::ConfigMap(o) => self.create_in(kind, o).await,
        }
    }

    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<ManagedObject, StoreError> {
        Ok(match kind {
            ObjectKind::Secret => ManagedObject::Secret(self.get_in(kind, namespace, name).await?),
            ObjectKind::EtcdCluster => {
                ManagedObject::EtcdCluster(self.get_in(kind, namespace, name).await?)
            }
            ObjectKind::Deployment => {
                ManagedObject::Deployment(self.get_in(kind, namespace, name).await?)
            }
            ObjectKind::Service => ManagedObject::Service(self.get_in(kind, namespace, name).await?),
            ObjectKind::ConfigMap => {
                ManagedObject::ConfigMap(self.get_in(kind, namespace, name).await?)
            }
        })
    }

    async fn update(&self, object: &ManagedObject) -> Result<(), StoreError> {
        let kind = object.kind();
        match object {
            ManagedObject::Secret(o) => self.replace_in(kind, o).await,
            ManagedObject::EtcdCluster(o) => self.replace_in(kind, o).await,
            ManagedObject::Deployment(o) => self.replace_in(kind, o).await,
            ManagedObject::Service(o) => self.replace_in(kind, o).await,
            ManagedObject::ConfigMap(o) => self.replace_in(kind, o).await,
        }
    }

    async fn list_pod_names(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, StoreError> {
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let pods = self
            .api::<Pod>(namespace)
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|source| StoreError::Kube {
                operation: "list",
                kind: "Pod",
                name: selector.clone(),
                source,
            })?;
        Ok(pods.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn update_status(&self, vault: &Vault, status: &VaultStatus) -> Result<(), StoreError> {
        let namespace = vault.namespace().unwrap_or_else(|| "default".to_string());
        let name = vault.name_any();
        let patch = serde_json::json!({ "status": status });
        self.api::<Vault>(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|source| StoreError::Kube {
                operation: "update status of",
                kind: "Vault",
                name,
                source,
            })?;
        Ok(())
    }
}
