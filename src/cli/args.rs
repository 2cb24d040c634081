//! Command-line arguments of `vault-unsealer`.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use vault_operator::constants::{
    DEFAULT_CONFIG_FILE, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_UNSEAL_ATTEMPTS, DEFAULT_UNSEAL_PERIOD,
    DEFAULT_VAULT_ADDR,
};
use vault_operator::controller::reconciler::validation::parse_kubernetes_duration;
use vault_operator::keystore::{BackendOptions, KeyStoreConfig};
use vault_operator::vault::unseal::UnsealPolicy;
use zeroize::Zeroizing;

/// Vault unseal and configuration worker
#[derive(Debug, Parser)]
#[command(name = "vault-unsealer", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub vault: VaultArgs,

    #[command(flatten)]
    pub key_store: KeyStoreArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialize (optionally) and unseal the local Vault node
    Unseal(UnsealArgs),
    /// Apply policies, auth methods and secret engines from a config file
    Configure(ConfigureArgs),
}

#[derive(Debug, Args)]
pub struct VaultArgs {
    #[arg(long, global = true, env = "VAULT_ADDR", default_value = DEFAULT_VAULT_ADDR)]
    pub vault_addr: String,

    /// CA bundle trusted for the Vault listener
    #[arg(long, global = true, env = "VAULT_CACERT")]
    pub vault_cacert: Option<PathBuf>,

    /// Timeout for each Vault or key store call, e.g. `30s`
    #[arg(long, global = true, value_parser = parse_duration, default_value_t = default_timeout())]
    pub timeout: HumanDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    #[value(name = "k8s")]
    Kubernetes,
    #[value(name = "google-cloud-kms-gcs")]
    GoogleCloudKmsGcs,
    #[value(name = "aws-secrets-manager")]
    AwsSecretsManager,
    #[value(name = "etcd")]
    Etcd,
    #[value(name = "memory")]
    Memory,
}

#[derive(Debug, Args)]
pub struct KeyStoreArgs {
    /// Key store backend
    #[arg(long, global = true, value_enum, default_value = "k8s")]
    pub mode: Mode,

    #[arg(long, global = true, env = "K8S_SECRET_NAMESPACE", default_value = "default")]
    pub k8s_secret_namespace: String,
    #[arg(long, global = true, env = "K8S_SECRET_NAME", default_value = "vault-unseal-keys")]
    pub k8s_secret_name: String,

    #[arg(long, global = true)]
    pub google_cloud_kms_project: Option<String>,
    #[arg(long, global = true)]
    pub google_cloud_kms_location: Option<String>,
    #[arg(long, global = true)]
    pub google_cloud_kms_key_ring: Option<String>,
    #[arg(long, global = true)]
    pub google_cloud_kms_crypto_key: Option<String>,
    #[arg(long, global = true)]
    pub google_cloud_storage_bucket: Option<String>,
    #[arg(long, global = true, default_value = "")]
    pub google_cloud_storage_prefix: String,

    #[arg(long, global = true, env = "AWS_REGION")]
    pub aws_region: Option<String>,
    #[arg(long, global = true)]
    pub aws_kms_key_id: Option<String>,
    #[arg(long, global = true, default_value = "")]
    pub aws_prefix: String,

    #[arg(long, global = true)]
    pub etcd_endpoint: Option<String>,
    #[arg(long, global = true, default_value = "")]
    pub etcd_prefix: String,
}

#[derive(Debug, Args)]
pub struct UnsealArgs {
    /// Delay between unseal attempts, e.g. `30s`
    #[arg(long, value_parser = parse_duration, default_value = DEFAULT_UNSEAL_PERIOD)]
    pub unseal_period: HumanDuration,

    #[arg(long, default_value_t = DEFAULT_UNSEAL_ATTEMPTS)]
    pub attempts: u32,

    /// Initialize Vault when it is not initialized yet
    #[arg(long, default_value_t = false)]
    pub init: bool,

    /// Persist the root token in the key store
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub store_root_token: bool,

    /// Root token to create after init, replacing the generated one
    #[arg(long, env = "VAULT_INIT_ROOT_TOKEN", hide_env_values = true)]
    pub init_root_token: Option<String>,

    #[arg(long, default_value_t = 5)]
    pub secret_shares: u32,

    #[arg(long, default_value_t = 3)]
    pub secret_threshold: u32,
}

#[derive(Debug, Args)]
pub struct ConfigureArgs {
    /// External config file, YAML or JSON
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

/// A `Duration` parsed from strings such as `30s`, `5m` or `1m30s`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl std::fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

fn parse_duration(raw: &str) -> Result<HumanDuration, String> {
    parse_kubernetes_duration(raw)
        .map(HumanDuration)
        .map_err(|e| e.to_string())
}

fn default_timeout() -> HumanDuration {
    HumanDuration(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
}

fn required(value: &Option<String>, flag: &str, mode: &str) -> anyhow::Result<String> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("--{flag} is required with --mode {mode}"))
}

impl KeyStoreArgs {
    pub fn to_config(&self) -> anyhow::Result<KeyStoreConfig> {
        Ok(match self.mode {
            Mode::Kubernetes => KeyStoreConfig::Kubernetes {
                namespace: self.k8s_secret_namespace.clone(),
                secret_name: self.k8s_secret_name.clone(),
            },
            Mode::GoogleCloudKmsGcs => {
                let mode = "google-cloud-kms-gcs";
                KeyStoreConfig::GoogleKmsGcs {
                    kms_project: required(&self.google_cloud_kms_project, "google-cloud-kms-project", mode)?,
                    kms_location: required(&self.google_cloud_kms_location, "google-cloud-kms-location", mode)?,
                    kms_key_ring: required(&self.google_cloud_kms_key_ring, "google-cloud-kms-key-ring", mode)?,
                    kms_crypto_key: required(&self.google_cloud_kms_crypto_key, "google-cloud-kms-crypto-key", mode)?,
                    bucket: required(&self.google_cloud_storage_bucket, "google-cloud-storage-bucket", mode)?,
                    prefix: self.google_cloud_storage_prefix.clone(),
                }
            }
            Mode::AwsSecretsManager => KeyStoreConfig::AwsSecretsManager {
                region: required(&self.aws_region, "aws-region", "aws-secrets-manager")?,
                kms_key_id: self.aws_kms_key_id.clone().filter(|k| !k.is_empty()),
                prefix: self.aws_prefix.clone(),
            },
            Mode::Etcd => KeyStoreConfig::Etcd {
                endpoint: required(&self.etcd_endpoint, "etcd-endpoint", "etcd")?,
                prefix: self.etcd_prefix.clone(),
            },
            Mode::Memory => KeyStoreConfig::Memory,
        })
    }
}

impl VaultArgs {
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            timeout: self.timeout.0,
        }
    }
}

impl UnsealArgs {
    pub fn to_policy(&self) -> UnsealPolicy {
        UnsealPolicy {
            period: self.unseal_period.0,
            attempts: self.attempts,
            init: self.init,
            store_root_token: self.store_root_token,
            init_root_token: self
                .init_root_token
                .clone()
                .filter(|t| !t.is_empty())
                .map(Zeroizing::new),
            secret_shares: self.secret_shares,
            secret_threshold: self.secret_threshold,
        }
    }
}
