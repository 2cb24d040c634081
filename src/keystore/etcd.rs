//! # etcd Key Store
//!
//! Stores keys in etcd through the v3 JSON gateway (`/v3/kv/put`,
//! `/v3/kv/range`). Keys and values travel base64-encoded, as the gateway
//! requires. A range that returns no `kvs` means the key was never written.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info_span, Instrument};
use zeroize::Zeroizing;

use super::{
    object_name_with_prefix, BackendOptions, KeyStore, KeyStoreConfig, KeyStoreError,
    KeyStoreFactory,
};
use crate::observability::metrics;

pub const MODE: &str = "etcd";

#[derive(Serialize)]
struct PutRequest<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct RangeRequest<'a> {
    key: &'a str,
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Deserialize)]
struct KeyValue {
    #[serde(default)]
    value: String,
}

#[derive(Debug)]
pub struct EtcdKeyStore {
    http: Client,
    endpoint: String,
    prefix: String,
}

impl EtcdKeyStore {
    pub fn new(http: Client, endpoint: &str, prefix: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            prefix: prefix.to_string(),
        }
    }

    fn encoded_key(&self, key: &str) -> String {
        base64::engine::general_purpose::STANDARD
            .encode(object_name_with_prefix(&self.prefix, key))
    }

    async fn range(&self, key: &str, operation: &'static str) -> Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError> {
        let encoded_key = self.encoded_key(key);
        let response = self
            .http
            .post(format!("{}/v3/kv/range", self.endpoint))
            .json(&RangeRequest { key: &encoded_key })
            .send()
            .await
            .map_err(|e| fail(operation, key, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(fail(operation, key, format!("HTTP {}: {}", status.as_u16(), body)));
        }
        let body: RangeResponse = response
            .json()
            .await
            .map_err(|e| fail(operation, key, e))?;
        let Some(kv) = body.kvs.into_iter().next() else {
            return Ok(None);
        };
        let encoded = Zeroizing::new(kv.value);
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map(|value| Some(Zeroizing::new(value)))
            .map_err(|e| KeyStoreError::Encoding {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

fn fail(operation: &'static str, key: &str, reason: impl std::fmt::Display) -> KeyStoreError {
    metrics::increment_keystore_operation_errors(MODE);
    KeyStoreError::backend(operation, key, reason)
}

#[async_trait]
impl KeyStore for EtcdKeyStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let span = info_span!("keystore.etcd.set", endpoint = %self.endpoint, key = key);
        let start = Instant::now();

        async move {
            let encoded_key = self.encoded_key(key);
            let encoded_value =
                Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(value));
            let response = self
                .http
                .post(format!("{}/v3/kv/put", self.endpoint))
                .json(&PutRequest {
                    key: &encoded_key,
                    value: encoded_value.as_str(),
                })
                .send()
                .await
                .map_err(|e| fail("set", key, e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(fail("set", key, format!("HTTP {}: {}", status.as_u16(), body)));
            }
            metrics::record_keystore_operation(MODE, "set", start.elapsed().as_secs_f64());
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let span = tracing::debug_span!("keystore.etcd.get", endpoint = %self.endpoint, key = key);
        let start = Instant::now();

        async move {
            let value = self.range(key, "get").await?;
            metrics::record_keystore_operation(MODE, "get", start.elapsed().as_secs_f64());
            value.ok_or_else(|| KeyStoreError::NotFound {
                key: key.to_string(),
            })
        }
        .instrument(span)
        .await
    }

    async fn test(&self, key: &str) -> Result<(), KeyStoreError> {
        self.range(key, "test").await.map(|_| ())
    }
}

pub struct Factory;

#[async_trait]
impl KeyStoreFactory for Factory {
    async fn create(
        &self,
        config: &KeyStoreConfig,
        options: &BackendOptions,
    ) -> Result<Arc<dyn KeyStore>, KeyStoreError> {
        let KeyStoreConfig::Etcd { endpoint, prefix } = config else {
            return Err(KeyStoreError::Config(format!(
                "etcd factory cannot build '{}' backend",
                config.mode()
            )));
        };
        let http = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| KeyStoreError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Arc::new(EtcdKeyStore::new(http, endpoint, prefix)))
    }
}
