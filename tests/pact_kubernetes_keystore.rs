//! Pact contract tests for the Kubernetes Secret key store
//!
//! These tests define the contract between the key store and the core/v1
//! Secrets API. The kube client is pointed at the mock server.

mod common;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use pact_consumer::prelude::*;
use serde_json::json;
use vault_operator::keystore::kubernetes::KubernetesKeyStore;
use vault_operator::keystore::{unseal_key_name, KeyStore, ROOT_TOKEN_KEY, TEST_KEY};

const SECRET_PATH: &str = "/api/v1/namespaces/vault/secrets/vault-unseal-keys";

fn secret_not_found() -> serde_json::Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": "secrets \"vault-unseal-keys\" not found",
        "reason": "NotFound",
        "details": {"name": "vault-unseal-keys", "kind": "secrets"},
        "code": 404
    })
}

fn store_for(mock_url: &str, owner: Option<OwnerReference>) -> KubernetesKeyStore {
    let config = kube::Config::new(mock_url.trim_end_matches('/').parse().unwrap());
    let client = kube::Client::try_from(config).unwrap();
    KubernetesKeyStore::new(client, "vault", "vault-unseal-keys", owner)
}

#[tokio::test]
async fn test_k8s_missing_secret_is_not_found() {
    common::init_rustls();
    let mut pact_builder = PactBuilder::new("Vault-Unsealer", "Kubernetes-API");

    pact_builder.interaction("read keys before the secret exists", "", |mut i| {
        i.given("secret vault/vault-unseal-keys does not exist");
        i.request.method("GET").path(SECRET_PATH);
        i.response
            .status(404)
            .header("content-type", "application/json")
            .json_body(secret_not_found());
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let store = store_for(mock_server.url().as_str(), None);

    let err = store.get(ROOT_TOKEN_KEY).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_k8s_missing_data_entry_is_not_found() {
    common::init_rustls();
    let mut pact_builder = PactBuilder::new("Vault-Unsealer", "Kubernetes-API");

    pact_builder.interaction("read a share the secret does not hold", "", |mut i| {
        i.given("secret vault/vault-unseal-keys holds only the root token");
        i.request.method("GET").path(SECRET_PATH);
        i.response
            .status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {"name": "vault-unseal-keys", "namespace": "vault"},
                "data": {"vault-root": "cy5yb290LXRva2Vu"}
            }));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let store = store_for(mock_server.url().as_str(), None);

    let err = store.get(&unseal_key_name(3)).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_k8s_first_write_creates_owned_secret() {
    common::init_rustls();
    let mut pact_builder = PactBuilder::new("Vault-Unsealer", "Kubernetes-API");

    let owner = OwnerReference {
        api_version: "vault.banzaicloud.com/v1alpha1".to_string(),
        kind: "Vault".to_string(),
        name: "vault".to_string(),
        uid: "6f1a3c5e-0000-4000-8000-000000000001".to_string(),
        controller: Some(true),
        ..OwnerReference::default()
    };
    let created = json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": "vault-unseal-keys",
            "namespace": "vault",
            "ownerReferences": [{
                "apiVersion": "vault.banzaicloud.com/v1alpha1",
                "kind": "Vault",
                "name": "vault",
                "uid": "6f1a3c5e-0000-4000-8000-000000000001",
                "controller": true
            }]
        },
        // s.root-token
        "data": {"vault-root": "cy5yb290LXRva2Vu"}
    });

    pact_builder
        .interaction("look up the secret before the first write", "", |mut i| {
            i.given("secret vault/vault-unseal-keys does not exist");
            i.request.method("GET").path(SECRET_PATH);
            i.response
                .status(404)
                .header("content-type", "application/json")
                .json_body(secret_not_found());
            i
        })
        .interaction("create the secret with the root token", "", |mut i| {
            i.given("secret vault/vault-unseal-keys does not exist");
            i.request
                .method("POST")
                .path("/api/v1/namespaces/vault/secrets")
                .header("content-type", "application/json")
                .json_body(created.clone());
            i.response
                .status(201)
                .header("content-type", "application/json")
                .json_body(created.clone());
            i
        });

    let mock_server = pact_builder.start_mock_server(None, None);
    let store = store_for(mock_server.url().as_str(), Some(owner));

    store
        .set(ROOT_TOKEN_KEY, b"s.root-token")
        .await
        .expect("create");
}

#[tokio::test]
async fn test_k8s_reachability_check_tolerates_missing_secret() {
    common::init_rustls();
    let mut pact_builder = PactBuilder::new("Vault-Unsealer", "Kubernetes-API");

    pact_builder.interaction("check the API is reachable before init", "", |mut i| {
        i.given("secret vault/vault-unseal-keys does not exist");
        i.request.method("GET").path(SECRET_PATH);
        i.response
            .status(404)
            .header("content-type", "application/json")
            .json_body(secret_not_found());
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let store = store_for(mock_server.url().as_str(), None);

    store.test(TEST_KEY).await.expect("reachability check");
}
