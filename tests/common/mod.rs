//! Common test utilities
//!
//! Provides rustls setup for the Pact tests, an in-memory [`ObjectStore`]
//! and `Vault` fixtures for the reconciler tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Mutex, Once};
use vault_operator::controller::reconciler::{
    CreateOutcome, ManagedObject, ObjectKind, ObjectStore, StoreError,
};
use vault_operator::crd::{Vault, VaultSpec, VaultStatus};

static RUSTLS_INIT: Once = Once::new();

/// Install the ring crypto provider once per test binary.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

type Key = (ObjectKind, String, String);

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<Key, ManagedObject>,
    created: Vec<Key>,
    updated: Vec<Key>,
    statuses: Vec<VaultStatus>,
    pods: Vec<String>,
}

/// Object store over a map, recording every write
#[derive(Default)]
pub struct FakeObjectStore {
    state: Mutex<FakeState>,
}

fn key_of(object: &ManagedObject) -> Key {
    (
        object.kind(),
        object.namespace().to_string(),
        object.name().to_string(),
    )
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pods(pods: &[&str]) -> Self {
        let store = Self::new();
        store.set_pods(pods);
        store
    }

    pub fn set_pods(&self, pods: &[&str]) {
        self.state.lock().unwrap().pods = pods.iter().map(|p| (*p).to_string()).collect();
    }

    /// Seed an object without counting it as created.
    pub fn insert(&self, object: ManagedObject) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(key_of(&object), object);
    }

    pub fn object(&self, kind: ObjectKind, name: &str) -> Option<ManagedObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .find(|((k, _, n), _)| *k == kind && n == name)
            .map(|(_, object)| object.clone())
    }

    /// `(kind, name)` of every stored object
    pub fn names(&self) -> Vec<(ObjectKind, String)> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .map(|(kind, _, name)| (*kind, name.clone()))
            .collect()
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().unwrap().created.len()
    }

    pub fn updated(&self) -> Vec<(ObjectKind, String)> {
        self.state
            .lock()
            .unwrap()
            .updated
            .iter()
            .map(|(kind, _, name)| (*kind, name.clone()))
            .collect()
    }

    pub fn statuses(&self) -> Vec<VaultStatus> {
        self.state.lock().unwrap().statuses.clone()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn create(&self, object: &ManagedObject) -> Result<CreateOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        let key = key_of(object);
        if state.objects.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.objects.insert(key.clone(), object.clone());
        state.created.push(key);
        Ok(CreateOutcome::Created)
    }

    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<ManagedObject, StoreError> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn update(&self, object: &ManagedObject) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let key = key_of(object);
        if !state.objects.contains_key(&key) {
            return Err(StoreError::NotFound {
                kind: key.0,
                namespace: key.1,
                name: key.2,
            });
        }
        state.objects.insert(key.clone(), object.clone());
        state.updated.push(key);
        Ok(())
    }

    async fn list_pod_names(
        &self,
        _namespace: &str,
        _labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self.state.lock().unwrap().pods.clone())
    }

    async fn update_status(&self, _vault: &Vault, status: &VaultStatus) -> Result<(), StoreError> {
        self.state.lock().unwrap().statuses.push(status.clone());
        Ok(())
    }
}

/// A `Vault` in namespace `vault` with a uid, so it can own objects.
pub fn vault(spec: VaultSpec) -> Vault {
    let mut vault = Vault::new("vault", spec);
    vault.metadata.namespace = Some("vault".to_string());
    vault.metadata.uid = Some("6c7a0a4e-1f3b-4ad4-9b7e-0c1b9d2f0001".to_string());
    vault
}

pub fn file_storage_vault() -> Vault {
    vault(VaultSpec {
        config: json!({
            "storage": {"file": {"path": "/vault/file"}},
            "listener": {"tcp": {"address": "0.0.0.0:8200", "tls_cert_file": "/vault/tls/server.crt", "tls_key_file": "/vault/tls/server.key"}}
        }),
        ..VaultSpec::default()
    })
}

pub fn etcd_vault(size: i32) -> Vault {
    vault(VaultSpec {
        size,
        config: json!({
            "storage": {"etcd": {"address": "https://etcd-cluster:2379", "ha_enabled": "true", "etcd_api": "v3"}},
            "listener": {"tcp": {"address": "0.0.0.0:8200"}}
        }),
        ..VaultSpec::default()
    })
}
