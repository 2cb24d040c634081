//! # Custom Resource Definitions
//!
//! - [`Vault`]: the cluster descriptor watched by the operator
//! - [`EtcdCluster`]: the etcd-operator object created when Vault uses etcd storage

mod etcd;
mod unseal;
mod vault;

pub use etcd::{EtcdCluster, EtcdClusterSpec, MemberSecret, StaticTls, TlsPolicy};
pub use unseal::{
    AwsUnsealConfig, EtcdUnsealConfig, GoogleUnsealConfig, KubernetesUnsealConfig, UnsealConfig,
    UnsealOptions,
};
pub use vault::{CredentialsConfig, Vault, VaultSpec, VaultStatus, HA_STORAGE_TYPES};
