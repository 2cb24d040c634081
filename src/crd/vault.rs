//! # Vault CRD
//!
//! The `Vault` resource describes one Vault cluster: replica count, images,
//! the server config (whose `storage` stanza selects the backend), the
//! configurer payload, credential injection and the unseal policy.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::unseal::UnsealConfig;

/// Storage backends Vault can run highly available on.
pub const HA_STORAGE_TYPES: &[&str] = &[
    "consul",
    "dynamodb",
    "etcd",
    "gcs",
    "mysql",
    "spanner",
    "zookeeper",
];

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "vault.banzaicloud.com",
    version = "v1alpha1",
    kind = "Vault",
    namespaced,
    status = "VaultStatus",
    shortname = "vault",
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VaultSpec {
    #[serde(default = "default_size")]
    pub size: i32,
    #[serde(default = "default_image")]
    pub image: String,
    /// Image for the unseal sidecar and configurer; the operator default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsealer_image: Option<String>,
    /// Vault server configuration, passed verbatim as `VAULT_LOCAL_CONFIG`.
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Value,
    /// Policies, auth methods and secret engines applied by the configurer.
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub external_config: Value,
    #[serde(default)]
    pub unseal_config: UnsealConfig,
    #[serde(default)]
    pub credentials_config: CredentialsConfig,
    #[serde(default = "default_service_type")]
    pub service_type: String,
}

/// Credentials file injected into both the server and the unsealer
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    /// Environment variable pointing at `path`, e.g. `GOOGLE_APPLICATION_CREDENTIALS`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// Full file path the secret is mounted at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    #[serde(default)]
    pub nodes: Vec<String>,
}

fn default_size() -> i32 {
    1
}

fn default_image() -> String {
    crate::constants::DEFAULT_VAULT_IMAGE.to_string()
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

fn preserve_unknown_fields(_gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

impl Default for VaultSpec {
    fn default() -> Self {
        Self {
            size: default_size(),
            image: default_image(),
            unsealer_image: None,
            config: Value::Object(Map::new()),
            external_config: Value::Object(Map::new()),
            unseal_config: UnsealConfig::default(),
            credentials_config: CredentialsConfig::default(),
            service_type: default_service_type(),
        }
    }
}

impl VaultSpec {
    /// The `storage` stanza of the server config.
    pub fn storage(&self) -> Option<&Map<String, Value>> {
        self.config.get("storage").and_then(Value::as_object)
    }

    /// Name of the configured storage backend. The stanza holds a single entry.
    pub fn storage_type(&self) -> Option<&str> {
        self.storage()
            .and_then(|storage| storage.keys().next())
            .map(String::as_str)
    }

    /// Settings of the configured storage backend.
    pub fn storage_config(&self) -> Option<&Map<String, Value>> {
        let storage_type = self.storage_type()?;
        self.storage()?.get(storage_type).and_then(Value::as_object)
    }

    pub fn uses_etcd(&self) -> bool {
        self.storage_type() == Some("etcd")
    }

    /// Whether the storage backend supports more than one active replica.
    ///
    /// Consul is always HA; the others need `ha_enabled` set in their stanza.
    pub fn has_ha_storage(&self) -> bool {
        let Some(storage_type) = self.storage_type() else {
            return false;
        };
        if !HA_STORAGE_TYPES.contains(&storage_type) {
            return false;
        }
        if storage_type == "consul" {
            return true;
        }
        self.storage_config()
            .and_then(|config| config.get("ha_enabled"))
            .is_some_and(is_truthy)
    }

    /// `address` of the etcd storage stanza, if etcd is selected.
    pub fn etcd_address(&self) -> Option<&str> {
        if !self.uses_etcd() {
            return None;
        }
        self.storage_config()
            .and_then(|config| config.get("address"))
            .and_then(Value::as_str)
    }

    /// Configurer payload as stored in the ConfigMap.
    pub fn external_config_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.external_config)
    }

    pub fn unsealer_image<'a>(&'a self, default: &'a str) -> &'a str {
        self.unsealer_image.as_deref().unwrap_or(default)
    }
}

/// Vault accepts `ha_enabled` as a bool or as a string.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        _ => false,
    }
}
