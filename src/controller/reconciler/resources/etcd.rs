//! # etcd Cluster
//!
//! The `EtcdCluster` backing Vault's etcd storage. Its name is the host of
//! `config.storage.etcd.address`, so the address Vault is configured with
//! resolves to the client service the etcd-operator creates.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use reqwest::Url;

use super::object_meta;
use super::tls::etcd_secret_name;
use crate::constants::{ETCD_CLUSTER_SIZE, ETCD_VERSION};
use crate::controller::reconciler::types::ReconcilerError;
use crate::crd::{EtcdCluster, EtcdClusterSpec, MemberSecret, StaticTls, TlsPolicy, Vault};

/// Name of the etcd cluster selected by the storage address.
pub fn etcd_cluster_name(vault: &Vault) -> Result<String, ReconcilerError> {
    let address = vault.spec.etcd_address().ok_or_else(|| {
        ReconcilerError::Validation("etcd storage requires config.storage.etcd.address".to_string())
    })?;
    let url = Url::parse(address).map_err(|e| {
        ReconcilerError::InvalidSpec(format!("invalid etcd address '{address}': {e}"))
    })?;
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ReconcilerError::InvalidSpec(format!("etcd address '{address}' has no host")))
}

pub fn etcd_cluster(name: &str, namespace: &str, owner: &OwnerReference) -> EtcdCluster {
    let secret = etcd_secret_name(name);
    let mut cluster = EtcdCluster::new(
        name,
        EtcdClusterSpec {
            size: ETCD_CLUSTER_SIZE,
            version: ETCD_VERSION.to_string(),
            tls: Some(TlsPolicy {
                static_tls: Some(StaticTls {
                    operator_secret: secret.clone(),
                    member: Some(MemberSecret {
                        server_secret: secret.clone(),
                        peer_secret: secret,
                    }),
                }),
            }),
        },
    );
    cluster.metadata = object_meta(name.to_string(), namespace, None, owner);
    cluster
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::resources::owner_reference;
    use crate::controller::reconciler::resources::test_support::{etcd_vault, vault};
    use crate::crd::VaultSpec;
    use serde_json::json;

    #[test]
    fn test_name_is_address_host() {
        assert_eq!(etcd_cluster_name(&etcd_vault()).unwrap(), "etcd-cluster");
    }

    #[test]
    fn test_address_without_scheme_is_invalid() {
        let vault = vault(VaultSpec {
            config: json!({"storage": {"etcd": {"address": "etcd-cluster:2379"}}}),
            ..VaultSpec::default()
        });
        // "etcd-cluster:2379" parses as scheme "etcd-cluster" with no host
        assert!(etcd_cluster_name(&vault).is_err());
    }

    #[test]
    fn test_cluster_points_at_tls_secret() {
        let vault = etcd_vault();
        let owner = owner_reference(&vault).unwrap();
        let cluster = etcd_cluster("etcd-cluster", "default", &owner);
        assert_eq!(cluster.spec.size, 3);
        assert_eq!(cluster.spec.version, "3.1.15");
        let static_tls = cluster.spec.tls.unwrap().static_tls.unwrap();
        assert_eq!(static_tls.operator_secret, "etcd-cluster-tls");
        assert_eq!(static_tls.member.unwrap().peer_secret, "etcd-cluster-tls");
        assert_eq!(cluster.metadata.owner_references.unwrap()[0].name, "vault");
    }
}
