//! Key store contract through the public registry.

mod common;

use vault_operator::keystore::memory::MemoryKeyStore;
use vault_operator::keystore::{
    unseal_key_name, BackendOptions, KeyStore, KeyStoreConfig, KeyStoreError, KeyStoreRegistry,
    ROOT_TOKEN_KEY,
};

#[tokio::test]
async fn test_memory_store_round_trip_across_handles() {
    let writer = MemoryKeyStore::new();
    let reader = writer.sibling();

    for i in 0..5 {
        writer
            .set(&unseal_key_name(i), format!("share-{i}").as_bytes())
            .await
            .unwrap();
    }
    writer.set(ROOT_TOKEN_KEY, b"s.root-token").await.unwrap();

    assert_eq!(reader.len().unwrap(), 6);
    assert_eq!(
        reader.get(&unseal_key_name(3)).await.unwrap().as_slice(),
        b"share-3"
    );
    assert_eq!(
        reader.get(ROOT_TOKEN_KEY).await.unwrap().as_slice(),
        b"s.root-token"
    );
}

#[tokio::test]
async fn test_overwrite_replaces_value() {
    let store = MemoryKeyStore::new();
    store.set(ROOT_TOKEN_KEY, b"first").await.unwrap();
    store.set(ROOT_TOKEN_KEY, b"second").await.unwrap();

    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.get(ROOT_TOKEN_KEY).await.unwrap().as_slice(), b"second");
}

#[tokio::test]
async fn test_missing_key_is_not_found() {
    let store = MemoryKeyStore::new();

    let err = store.get(&unseal_key_name(0)).await.unwrap_err();

    assert!(err.is_not_found());
    assert!(matches!(err, KeyStoreError::NotFound { key } if key == "vault-unseal-0"));
    store.test("vault-test").await.unwrap();
}

#[tokio::test]
async fn test_registry_memory_instances_share_state() {
    let registry = KeyStoreRegistry::with_defaults();
    let options = BackendOptions::default();

    let first = registry.build(&KeyStoreConfig::Memory, &options).await.unwrap();
    let second = registry.build(&KeyStoreConfig::Memory, &options).await.unwrap();

    first
        .set("registry-shared-key", b"visible")
        .await
        .unwrap();
    assert_eq!(
        second.get("registry-shared-key").await.unwrap().as_slice(),
        b"visible"
    );
}

#[tokio::test]
async fn test_registry_builds_etcd_backend() {
    common::init_rustls();
    let registry = KeyStoreRegistry::with_defaults();

    registry
        .build(
            &KeyStoreConfig::Etcd {
                endpoint: "http://127.0.0.1:2379".to_string(),
                prefix: "vault/".to_string(),
            },
            &BackendOptions::default(),
        )
        .await
        .unwrap();
}
