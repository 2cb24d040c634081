//! # Configurer
//!
//! A single-replica deployment running `vault-unsealer configure` against
//! the Vault service, fed by ConfigMap `<name>-configurer`.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

use super::tls::vault_secret_name;
use super::{
    configurer_labels, credentials_env, credentials_mount, credentials_volume, env, mount,
    namespace_of, object_meta, secret_volume,
};
use crate::config::ControllerConfig;
use crate::constants::{DEFAULT_CONFIG_FILE, ENV_VAULT_ADDR, ENV_VAULT_CACERT, VAULT_CACERT_PATH, VAULT_PORT};
use crate::controller::reconciler::types::ReconcilerError;
use crate::crd::Vault;

pub fn configurer_name(vault: &Vault) -> String {
    format!("{}-configurer", vault.name_any())
}

/// Address of the Vault service as seen from inside the cluster
pub fn service_addr(vault: &Vault) -> String {
    format!(
        "https://{}.{}:{}",
        vault.name_any(),
        namespace_of(vault),
        VAULT_PORT
    )
}

pub fn configurer_config_map(
    vault: &Vault,
    owner: &OwnerReference,
) -> Result<ConfigMap, ReconcilerError> {
    let payload = vault
        .spec
        .external_config_json()
        .map_err(|source| ReconcilerError::Serialization {
            what: "external config",
            source,
        })?;
    Ok(ConfigMap {
        metadata: object_meta(
            configurer_name(vault),
            &namespace_of(vault),
            Some(configurer_labels(vault)),
            owner,
        ),
        data: Some(BTreeMap::from([(DEFAULT_CONFIG_FILE.to_string(), payload)])),
        ..ConfigMap::default()
    })
}

pub fn configurer_deployment(
    vault: &Vault,
    owner: &OwnerReference,
    config: &ControllerConfig,
) -> Deployment {
    let labels = configurer_labels(vault);
    let name = configurer_name(vault);

    let mut env_vars = vec![
        env(ENV_VAULT_ADDR, service_addr(vault)),
        env(ENV_VAULT_CACERT, VAULT_CACERT_PATH),
    ];
    env_vars.extend(credentials_env(vault));

    let mut mounts = vec![mount("config", "/config"), mount("vault-tls", "/vault/tls")];
    mounts.extend(credentials_mount(vault));

    let mut volumes = vec![
        Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: name.clone(),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        },
        secret_volume("vault-tls", &vault_secret_name(vault)),
    ];
    volumes.extend(credentials_volume(vault));

    let container = Container {
        name: "configurer".to_string(),
        image: Some(
            vault
                .spec
                .unsealer_image(&config.default_unsealer_image)
                .to_string(),
        ),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["vault-unsealer".to_string(), "configure".to_string()]),
        args: Some(vault.spec.unseal_config.key_store_args(vault)),
        working_dir: Some("/config".to_string()),
        env: Some(env_vars),
        volume_mounts: Some(mounts),
        ..Container::default()
    };

    Deployment {
        metadata: object_meta(name, &namespace_of(vault), Some(labels.clone()), owner),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
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
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// Configurer payload stored in a ConfigMap, if any.
pub fn config_map_payload(config_map: &ConfigMap) -> Option<&str> {
    config_map
        .data
        .as_ref()
        .and_then(|data| data.get(DEFAULT_CONFIG_FILE))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::resources::owner_reference;
    use crate::controller::reconciler::resources::test_support::vault;
    use crate::crd::VaultSpec;
    use serde_json::json;

    #[test]
    fn test_config_map_holds_external_config() {
        let vault = vault(VaultSpec {
            external_config: json!({"policies": [{"name": "allow_secrets", "rules": "path \"secret/*\" {}"}]}),
            ..VaultSpec::default()
        });
        let config_map = configurer_config_map(&vault, &owner_reference(&vault).unwrap()).unwrap();

        assert_eq!(config_map.metadata.name.as_deref(), Some("vault-configurer"));
        let payload: serde_json::Value =
            serde_json::from_str(config_map_payload(&config_map).unwrap()).unwrap();
        assert_eq!(payload["policies"][0]["name"], "allow_secrets");
    }

    #[test]
    fn test_configurer_targets_service() {
        let vault = vault(VaultSpec::default());
        let deployment = configurer_deployment(
            &vault,
            &owner_reference(&vault).unwrap(),
            &ControllerConfig::default(),
        );
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));

        let pod = spec.template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.working_dir.as_deref(), Some("/config"));
        assert_eq!(
            container.command.as_ref().unwrap(),
            &vec!["vault-unsealer".to_string(), "configure".to_string()]
        );
        let addr = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "VAULT_ADDR")
            .and_then(|e| e.value.clone());
        assert_eq!(addr.as_deref(), Some("https://vault.default:8200"));

        let config_volume = &pod.volumes.unwrap()[0];
        assert_eq!(
            config_volume.config_map.as_ref().unwrap().name,
            "vault-configurer"
        );
    }
}
