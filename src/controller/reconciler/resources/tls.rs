//! # TLS Secrets
//!
//! Secrets holding the CA and leaf material for Vault (`<name>-tls`) and
//! for its etcd cluster (`<etcd>-tls`).

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};

use super::{namespace_of, object_meta};
use crate::constants::{ETCD_CLIENT_CA_FILE, ETCD_CLIENT_CERT_FILE, ETCD_CLIENT_KEY_FILE};
use crate::crd::Vault;
use crate::pki::CertificateBundle;

pub fn vault_secret_name(vault: &Vault) -> String {
    format!("{}-tls", vault.name_any())
}

pub fn etcd_secret_name(etcd_name: &str) -> String {
    format!("{etcd_name}-tls")
}

/// SANs of the Vault server certificate
pub fn vault_sans(vault: &Vault) -> BTreeSet<String> {
    BTreeSet::from([
        format!("{}.{}", vault.name_any(), namespace_of(vault)),
        "127.0.0.1".to_string(),
    ])
}

/// SANs shared by the etcd server, peer and client certificates
pub fn etcd_sans(etcd_name: &str, namespace: &str) -> BTreeSet<String> {
    BTreeSet::from([
        etcd_name.to_string(),
        format!("{etcd_name}.{namespace}"),
        format!("*.{etcd_name}.{namespace}.svc"),
        format!("{etcd_name}-client.{namespace}.svc"),
        "localhost".to_string(),
    ])
}

fn entry(data: &mut BTreeMap<String, ByteString>, key: &str, value: &str) {
    data.insert(key.to_string(), ByteString(value.as_bytes().to_vec()));
}

pub fn vault_tls_secret(vault: &Vault, owner: &OwnerReference, bundle: &CertificateBundle) -> Secret {
    let mut data = BTreeMap::new();
    entry(&mut data, "ca.crt", &bundle.ca_cert);
    entry(&mut data, "server.crt", &bundle.server.cert);
    entry(&mut data, "server.key", &bundle.server.key);
    Secret {
        metadata: object_meta(vault_secret_name(vault), &namespace_of(vault), None, owner),
        data: Some(data),
        ..Secret::default()
    }
}

/// One secret serving the etcd-operator's operator, server and peer slots.
pub fn etcd_tls_secret(
    etcd_name: &str,
    namespace: &str,
    owner: &OwnerReference,
    bundle: &CertificateBundle,
) -> Secret {
    let mut data = BTreeMap::new();
    entry(&mut data, ETCD_CLIENT_CA_FILE, &bundle.ca_cert);
    entry(&mut data, ETCD_CLIENT_CERT_FILE, &bundle.client.cert);
    entry(&mut data, ETCD_CLIENT_KEY_FILE, &bundle.client.key);
    entry(&mut data, "peer-ca.crt", &bundle.ca_cert);
    entry(&mut data, "peer.crt", &bundle.peer.cert);
    entry(&mut data, "peer.key", &bundle.peer.key);
    entry(&mut data, "server-ca.crt", &bundle.ca_cert);
    entry(&mut data, "server.crt", &bundle.server.cert);
    entry(&mut data, "server.key", &bundle.server.key);
    Secret {
        metadata: object_meta(etcd_secret_name(etcd_name), namespace, None, owner),
        data: Some(data),
        ..Secret::default()
    }
}
