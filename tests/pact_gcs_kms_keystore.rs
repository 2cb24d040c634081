//! Pact contract tests for the Cloud KMS + GCS key store
//!
//! These tests define the contract between the key store and the KMS
//! `encrypt`/`decrypt` endpoints and the GCS JSON API. One mock server stands
//! in for both services.

mod common;

use pact_consumer::prelude::*;
use serde_json::json;
use vault_operator::keystore::gcs_kms::{Endpoints, GcsKmsKeyStore, GcsKmsLocation, TokenSource};
use vault_operator::keystore::{unseal_key_name, KeyStore, ROOT_TOKEN_KEY, TEST_KEY};
use zeroize::Zeroizing;

const CRYPTO_KEY_PATH: &str =
    "/v1/projects/vault-project/locations/global/keyRings/vault/cryptoKeys/bank-vaults";

fn store_for(mock_url: String) -> GcsKmsKeyStore {
    GcsKmsKeyStore::new(
        reqwest::Client::new(),
        GcsKmsLocation {
            kms_project: "vault-project".to_string(),
            kms_location: "global".to_string(),
            kms_key_ring: "vault".to_string(),
            kms_crypto_key: "bank-vaults".to_string(),
            bucket: "vault-keys".to_string(),
            prefix: String::new(),
        },
        Endpoints {
            storage: mock_url.clone(),
            kms: mock_url.clone(),
            metadata_token: mock_url,
        },
        TokenSource::Static(Zeroizing::new("test-token".to_string())),
    )
}

#[tokio::test]
async fn test_gcs_missing_object_is_not_found() {
    common::init_rustls();
    let mut pact_builder = PactBuilder::new("Vault-Unsealer", "Google-Cloud-Storage");

    pact_builder.interaction("download a key that was never written", "", |mut i| {
        i.given("the bucket holds no root token");
        i.request
            .method("GET")
            .path("/storage/v1/b/vault-keys/o/vault-root")
            .query_param("alt", "media")
            .header("authorization", "Bearer test-token");
        i.response
            .status(404)
            .header("content-type", "application/json")
            .json_body(json!({"error": {"code": 404, "message": "No such object: vault-keys/vault-root"}}));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let store = store_for(mock_server.url().to_string());

    let err = store.get(ROOT_TOKEN_KEY).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_gcs_reachability_check_accepts_missing_object() {
    common::init_rustls();
    let mut pact_builder = PactBuilder::new("Vault-Unsealer", "Google-Cloud-Storage");

    pact_builder.interaction("read the test object metadata before init", "", |mut i| {
        i.given("the bucket is empty");
        i.request
            .method("GET")
            .path("/storage/v1/b/vault-keys/o/vault-test")
            .header("authorization", "Bearer test-token");
        i.response
            .status(404)
            .header("content-type", "application/json")
            .json_body(json!({"error": {"code": 404, "message": "No such object: vault-keys/vault-test"}}));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let store = store_for(mock_server.url().to_string());

    store.test(TEST_KEY).await.expect("reachability check");
}

#[tokio::test]
async fn test_gcs_reachability_check_rejects_forbidden_bucket() {
    common::init_rustls();
    let mut pact_builder = PactBuilder::new("Vault-Unsealer", "Google-Cloud-Storage");

    pact_builder.interaction("read the test object metadata without access", "", |mut i| {
        i.given("the service account cannot read the bucket");
        i.request
            .method("GET")
            .path("/storage/v1/b/vault-keys/o/vault-test")
            .header("authorization", "Bearer test-token");
        i.response
            .status(403)
            .header("content-type", "application/json")
            .json_body(json!({"error": {"code": 403, "message": "does not have storage.objects.get access"}}));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let store = store_for(mock_server.url().to_string());

    let err = store.test(TEST_KEY).await.unwrap_err();
    assert!(!err.is_not_found());
    assert!(err.to_string().contains("403"));
}

#[tokio::test]
async fn test_gcs_kms_encrypt_upload_download_decrypt() {
    common::init_rustls();
    let mut pact_builder = PactBuilder::new("Vault-Unsealer", "Google-Cloud-KMS-GCS");

    // key-material-0 <-> a2V5LW1hdGVyaWFsLTA=, ciphertext <-> Y2lwaGVydGV4dA==
    pact_builder
        .interaction("encrypt an unseal share", "", |mut i| {
            i.given("the crypto key is enabled");
            i.request
                .method("POST")
                .path(format!("{CRYPTO_KEY_PATH}:encrypt"))
                .header("content-type", "application/json")
                .json_body(json!({"plaintext": "a2V5LW1hdGVyaWFsLTA="}));
            i.response
                .status(200)
                .header("content-type", "application/json")
                .json_body(json!({"name": CRYPTO_KEY_PATH.trim_start_matches("/v1/"), "ciphertext": "Y2lwaGVydGV4dA=="}));
            i
        })
        .interaction("upload the encrypted share", "", |mut i| {
            i.given("the bucket is writable");
            i.request
                .method("POST")
                .path("/upload/storage/v1/b/vault-keys/o")
                .query_param("uploadType", "media")
                .query_param("name", "vault-unseal-0")
                .header("content-type", "application/octet-stream")
                .body("ciphertext");
            i.response
                .status(200)
                .header("content-type", "application/json")
                .json_body(json!({"bucket": "vault-keys", "name": "vault-unseal-0"}));
            i
        })
        .interaction("download the encrypted share", "", |mut i| {
            i.given("vault-unseal-0 exists");
            i.request
                .method("GET")
                .path("/storage/v1/b/vault-keys/o/vault-unseal-0")
                .query_param("alt", "media");
            i.response
                .status(200)
                .header("content-type", "application/octet-stream")
                .body("ciphertext");
            i
        })
        .interaction("decrypt the share", "", |mut i| {
            i.given("the crypto key is enabled");
            i.request
                .method("POST")
                .path(format!("{CRYPTO_KEY_PATH}:decrypt"))
                .header("content-type", "application/json")
                .json_body(json!({"ciphertext": "Y2lwaGVydGV4dA=="}));
            i.response
                .status(200)
                .header("content-type", "application/json")
                .json_body(json!({"plaintext": "a2V5LW1hdGVyaWFsLTA="}));
            i
        });

    let mock_server = pact_builder.start_mock_server(None, None);
    let store = store_for(mock_server.url().to_string());

    store
        .set(&unseal_key_name(0), b"key-material-0")
        .await
        .expect("set");
    let value = store.get(&unseal_key_name(0)).await.expect("get");
    assert_eq!(value.as_slice(), b"key-material-0");
}
