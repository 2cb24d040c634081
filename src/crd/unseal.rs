//! # Unseal configuration
//!
//! Selects the key store the unsealer uses and renders it as unsealer
//! command-line arguments for the sidecar and the configurer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Vault;
use kube::ResourceExt;

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnsealConfig {
    #[serde(default)]
    pub options: UnsealOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesUnsealConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<GoogleUnsealConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsUnsealConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd: Option<EtcdUnsealConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnsealOptions {
    /// Polling period of the unseal loop, e.g. `30s`
    #[serde(default = "default_period")]
    pub period: String,
    /// Initialize Vault when it is not yet initialized
    #[serde(default = "default_true")]
    pub init: bool,
    #[serde(default = "default_true")]
    pub store_root_token: bool,
    #[serde(default = "default_secret_shares")]
    pub secret_shares: u32,
    #[serde(default = "default_secret_threshold")]
    pub secret_threshold: u32,
}

/// Development-only store in a Kubernetes Secret
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesUnsealConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

/// GCS bucket with objects encrypted by a Cloud KMS key
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleUnsealConfig {
    pub kms_key_ring: String,
    pub kms_crypto_key: String,
    pub kms_location: String,
    pub kms_project: String,
    pub storage_bucket: String,
    #[serde(default)]
    pub storage_prefix: String,
}

/// AWS Secrets Manager, encrypted with the given KMS key
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsUnsealConfig {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    #[serde(default)]
    pub prefix: String,
}

/// etcd v3 gateway, usually the cluster backing Vault storage
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdUnsealConfig {
    pub endpoint: String,
    #[serde(default)]
    pub prefix: String,
}

fn default_period() -> String {
    crate::constants::DEFAULT_UNSEAL_PERIOD.to_string()
}

fn default_true() -> bool {
    true
}

fn default_secret_shares() -> u32 {
    crate::constants::DEFAULT_SECRET_SHARES
}

fn default_secret_threshold() -> u32 {
    crate::constants::DEFAULT_SECRET_THRESHOLD
}

impl Default for UnsealOptions {
    fn default() -> Self {
        Self {
            period: default_period(),
            init: true,
            store_root_token: true,
            secret_shares: default_secret_shares(),
            secret_threshold: default_secret_threshold(),
        }
    }
}

impl UnsealConfig {
    /// Key store selection flags, shared by `unseal` and `configure`.
    pub fn key_store_args(&self, vault: &Vault) -> Vec<String> {
        if let Some(google) = &self.google {
            return vec![
                "--mode".into(),
                "google-cloud-kms-gcs".into(),
                "--google-cloud-kms-key-ring".into(),
                google.kms_key_ring.clone(),
                "--google-cloud-kms-crypto-key".into(),
                google.kms_crypto_key.clone(),
                "--google-cloud-kms-location".into(),
                google.kms_location.clone(),
                "--google-cloud-kms-project".into(),
                google.kms_project.clone(),
                "--google-cloud-storage-bucket".into(),
                google.storage_bucket.clone(),
                "--google-cloud-storage-prefix".into(),
                google.storage_prefix.clone(),
            ];
        }

        if let Some(aws) = &self.aws {
            let mut args = vec![
                "--mode".into(),
                "aws-secrets-manager".into(),
                "--aws-region".into(),
                aws.region.clone(),
                "--aws-prefix".into(),
                aws.prefix.clone(),
            ];
            if let Some(key_id) = &aws.kms_key_id {
                args.push("--aws-kms-key-id".into());
                args.push(key_id.clone());
            }
            return args;
        }

        if let Some(etcd) = &self.etcd {
            return vec![
                "--mode".into(),
                "etcd".into(),
                "--etcd-endpoint".into(),
                etcd.endpoint.clone(),
                "--etcd-prefix".into(),
                etcd.prefix.clone(),
            ];
        }

        let kubernetes = self.kubernetes.clone().unwrap_or_default();
        let namespace = kubernetes
            .secret_namespace
            .or_else(|| vault.namespace())
            .unwrap_or_else(|| "default".to_string());
        let name = kubernetes
            .secret_name
            .unwrap_or_else(|| format!("{}-unseal-keys", vault.name_any()));
        vec![
            "--mode".into(),
            "k8s".into(),
            "--k8s-secret-namespace".into(),
            namespace,
            "--k8s-secret-name".into(),
            name,
        ]
    }

    /// Flags of the `unseal` subcommand.
    pub fn unseal_args(&self) -> Vec<String> {
        let mut args = vec![
            "--unseal-period".to_string(),
            self.options.period.clone(),
            "--secret-shares".to_string(),
            self.options.secret_shares.to_string(),
            "--secret-threshold".to_string(),
            self.options.secret_threshold.to_string(),
            format!("--store-root-token={}", self.options.store_root_token),
        ];
        if self.options.init {
            args.push("--init".to_string());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::VaultSpec;

    fn vault(unseal_config: UnsealConfig) -> Vault {
        let mut vault = Vault::new(
            "vault",
            VaultSpec {
                unseal_config,
                ..VaultSpec::default()
            },
        );
        vault.metadata.namespace = Some("secrets".to_string());
        vault
    }

    #[test]
    fn test_kubernetes_mode_is_the_default() {
        let config = UnsealConfig::default();
        let args = config.key_store_args(&vault(config.clone()));
        assert_eq!(
            args,
            vec![
                "--mode",
                "k8s",
                "--k8s-secret-namespace",
                "secrets",
                "--k8s-secret-name",
                "vault-unseal-keys"
            ]
        );
    }

    #[test]
    fn test_etcd_mode_args() {
        let config = UnsealConfig {
            etcd: Some(EtcdUnsealConfig {
                endpoint: "https://etcd-cluster:2379".to_string(),
                prefix: "vault/".to_string(),
            }),
            ..UnsealConfig::default()
        };
        let args = config.key_store_args(&vault(config.clone()));
        assert_eq!(args[1], "etcd");
        assert!(args.contains(&"https://etcd-cluster:2379".to_string()));
        assert!(args.contains(&"vault/".to_string()));
    }

    #[test]
    fn test_unseal_args_carry_options() {
        let mut config = UnsealConfig::default();
        config.options.store_root_token = false;
        let args = config.unseal_args();
        assert!(args.contains(&"--store-root-token=false".to_string()));
        assert!(args.contains(&"--init".to_string()));
        assert_eq!(args[1], "30s");

        config.options.init = false;
        assert!(!config.unseal_args().contains(&"--init".to_string()));
    }
}
