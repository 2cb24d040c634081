//! # Resources
//!
//! Builders for the objects owned by a `Vault`. Builders are pure: they
//! turn the resource and operator config into the desired object.

pub mod configurer;
pub mod deployment;
pub mod etcd;
pub mod service;
pub mod tls;

use k8s_openapi::api::core::v1::{EnvVar, SecretVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::controller::reconciler::types::ReconcilerError;
use crate::crd::Vault;

/// Labels of the Vault server pods
pub fn vault_labels(vault: &Vault) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "vault".to_string()),
        ("vault_cr".to_string(), vault.name_any()),
    ])
}

/// Labels of the configurer pod
pub fn configurer_labels(vault: &Vault) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "vault-configurator".to_string()),
        ("vault_cr".to_string(), vault.name_any()),
    ])
}

pub fn namespace_of(vault: &Vault) -> String {
    vault.namespace().unwrap_or_else(|| "default".to_string())
}

/// Controller owner reference pointing at `vault`.
pub fn owner_reference(vault: &Vault) -> Result<OwnerReference, ReconcilerError> {
    vault.controller_owner_ref(&()).ok_or_else(|| {
        ReconcilerError::InvalidSpec(format!(
            "Vault {} has no uid, cannot own objects",
            vault.name_any()
        ))
    })
}

pub(crate) fn object_meta(
    name: String,
    namespace: &str,
    labels: Option<BTreeMap<String, String>>,
    owner: &OwnerReference,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels,
        owner_references: Some(vec![owner.clone()]),
        ..ObjectMeta::default()
    }
}

pub(crate) fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..EnvVar::default()
    }
}

pub(crate) fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

pub(crate) fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..VolumeMount::default()
    }
}

/// Env entry for `credentialsConfig`, pointing `env` at `path`.
pub(crate) fn credentials_env(vault: &Vault) -> Option<EnvVar> {
    let credentials = &vault.spec.credentials_config;
    match (&credentials.env, &credentials.path) {
        (Some(name), Some(path)) if !name.is_empty() => Some(env(name, path.clone())),
        _ => None,
    }
}

/// Volume holding the credentials secret, named after the secret.
pub(crate) fn credentials_volume(vault: &Vault) -> Option<Volume> {
    let secret_name = vault.spec.credentials_config.secret_name.as_deref()?;
    (!secret_name.is_empty()).then(|| secret_volume(secret_name, secret_name))
}

/// Mount of the credentials file at `path`, projected through `subPath`.
pub(crate) fn credentials_mount(vault: &Vault) -> Option<VolumeMount> {
    let credentials = &vault.spec.credentials_config;
    let secret_name = credentials.secret_name.as_deref().filter(|s| !s.is_empty())?;
    let path = credentials.path.as_deref()?;
    let file_name = std::path::Path::new(path)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(path);
    Some(VolumeMount {
        name: secret_name.to_string(),
        mount_path: path.to_string(),
        sub_path: Some(file_name.to_string()),
        ..VolumeMount::default()
    })
}
