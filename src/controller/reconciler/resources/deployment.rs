//! # Server Deployment
//!
//! The Vault server pods: a `vault` container running the server with the
//! descriptor's config, and an `unsealer` sidecar driving init and unseal
//! against the local listener.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EmptyDirVolumeSource, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, SecurityContext, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde_json::{json, Value};

use super::{
    credentials_env, credentials_mount, credentials_volume, env, mount, namespace_of,
    object_meta, secret_volume, vault_labels,
};
use super::etcd::etcd_cluster_name;
use super::tls::{etcd_secret_name, vault_secret_name};
use crate::config::ControllerConfig;
use crate::constants::{
    DEFAULT_VAULT_ADDR, ENV_K8S_OWNER_REFERENCE, ENV_VAULT_ADDR, ENV_VAULT_CACERT,
    ETCD_CLIENT_CA_FILE, ETCD_CLIENT_CERT_FILE, ETCD_CLIENT_KEY_FILE, ETCD_TLS_MOUNT_PATH,
    VAULT_CACERT_PATH, VAULT_PORT,
};
use crate::controller::reconciler::types::ReconcilerError;
use crate::crd::Vault;

const PORT_NAME: &str = "vault";

/// Name of the server deployment, the descriptor's own name.
pub fn server_deployment_name(vault: &Vault) -> String {
    vault.name_any()
}

/// Server config handed to Vault through `VAULT_LOCAL_CONFIG`.
///
/// With etcd storage the client certificate files mounted from the etcd TLS
/// secret are added to the `storage.etcd` stanza.
pub fn server_config(vault: &Vault) -> Result<String, ReconcilerError> {
    let mut config = vault.spec.config.clone();
    if vault.spec.uses_etcd() {
        if let Some(etcd) = config
            .get_mut("storage")
            .and_then(|storage| storage.get_mut("etcd"))
            .and_then(Value::as_object_mut)
        {
            etcd.insert(
                "tls_ca_file".to_string(),
                json!(format!("{ETCD_TLS_MOUNT_PATH}/{ETCD_CLIENT_CA_FILE}")),
            );
            etcd.insert(
                "tls_cert_file".to_string(),
                json!(format!("{ETCD_TLS_MOUNT_PATH}/{ETCD_CLIENT_CERT_FILE}")),
            );
            etcd.insert(
                "tls_key_file".to_string(),
                json!(format!("{ETCD_TLS_MOUNT_PATH}/{ETCD_CLIENT_KEY_FILE}")),
            );
        }
    }
    serde_json::to_string(&config).map_err(|source| ReconcilerError::Serialization {
        what: "vault server config",
        source,
    })
}

fn https_probe(path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String(PORT_NAME.to_string()),
            scheme: Some("HTTPS".to_string()),
            ..HTTPGetAction::default()
        }),
        ..Probe::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Volume::default()
    }
}

fn vault_container(vault: &Vault) -> Result<Container, ReconcilerError> {
    let mut env_vars = vec![
        env("VAULT_LOCAL_CONFIG", server_config(vault)?),
        env(ENV_VAULT_ADDR, DEFAULT_VAULT_ADDR),
        env(ENV_VAULT_CACERT, VAULT_CACERT_PATH),
    ];
    env_vars.extend(credentials_env(vault));

    let mut mounts = vec![
        mount("vault-config", "/vault/config"),
        mount("vault-file", "/vault/file"),
        mount("vault-tls", "/vault/tls"),
    ];
    if vault.spec.uses_etcd() {
        mounts.push(mount("etcd-tls", ETCD_TLS_MOUNT_PATH));
    }
    mounts.extend(credentials_mount(vault));

    Ok(Container {
        name: "vault".to_string(),
        image: Some(vault.spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec!["server".to_string(), "-log-level=debug".to_string()]),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            container_port: VAULT_PORT,
            ..ContainerPort::default()
        }]),
        env: Some(env_vars),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["IPC_LOCK".to_string()]),
                ..Capabilities::default()
            }),
            ..SecurityContext::default()
        }),
        liveness_probe: Some(https_probe("/v1/sys/init")),
        readiness_probe: Some(https_probe("/v1/sys/health")),
        volume_mounts: Some(mounts),
        ..Container::default()
    })
}

fn unsealer_container(
    vault: &Vault,
    owner: &OwnerReference,
    config: &ControllerConfig,
) -> Result<Container, ReconcilerError> {
    let owner_json =
        serde_json::to_string(owner).map_err(|source| ReconcilerError::Serialization {
            what: "owner reference",
            source,
        })?;
    let mut env_vars = vec![
        env(ENV_K8S_OWNER_REFERENCE, owner_json),
        env(ENV_VAULT_CACERT, VAULT_CACERT_PATH),
    ];
    env_vars.extend(credentials_env(vault));

    let mut mounts = vec![mount("vault-tls", "/vault/tls")];
    mounts.extend(credentials_mount(vault));

    let unseal_config = &vault.spec.unseal_config;
    let mut args = unseal_config.unseal_args();
    args.extend(unseal_config.key_store_args(vault));

    Ok(Container {
        name: "unsealer".to_string(),
        image: Some(
            vault
                .spec
                .unsealer_image(&config.default_unsealer_image)
                .to_string(),
        ),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["vault-unsealer".to_string(), "unseal".to_string()]),
        args: Some(args),
        env: Some(env_vars),
        volume_mounts: Some(mounts),
        ..Container::default()
    })
}

pub fn server_deployment(
    vault: &Vault,
    owner: &OwnerReference,
    config: &ControllerConfig,
) -> Result<Deployment, ReconcilerError> {
    let labels = vault_labels(vault);

    let mut volumes = vec![
        empty_dir("vault-config"),
        empty_dir("vault-file"),
        secret_volume("vault-tls", &vault_secret_name(vault)),
    ];
    if vault.spec.uses_etcd() {
        volumes.push(secret_volume(
            "etcd-tls",
            &etcd_secret_name(&etcd_cluster_name(vault)?),
        ));
    }
    volumes.extend(credentials_volume(vault));

    Ok(Deployment {
        metadata: object_meta(
            server_deployment_name(vault),
            &namespace_of(vault),
            Some(labels.clone()),
            owner,
        ),
        spec: Some(DeploymentSpec {
            replicas: Some(vault.spec.size),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![
                        vault_container(vault)?,
                        unsealer_container(vault, owner, config)?,
                    ],
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    })
}

/// Replica count of a deployment, as the API server reports it.
pub fn replicas(deployment: &Deployment) -> Option<i32> {
    deployment.spec.as_ref().and_then(|spec| spec.replicas)
}
