//! # Google Cloud KMS + GCS Key Store
//!
//! Values are encrypted with a Cloud KMS crypto key and the ciphertext is
//! written to a GCS object named `prefix + key`. Both services are called
//! through their REST APIs with reqwest.
//!
//! Access tokens come from the GCE metadata server (Workload Identity) and
//! are cached until shortly before they expire. A static token can be
//! supplied instead for local use and contract tests.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};
use zeroize::Zeroizing;

use super::{
    object_name_with_prefix, BackendOptions, KeyStore, KeyStoreConfig, KeyStoreError,
    KeyStoreFactory,
};
use crate::observability::metrics;

pub const MODE: &str = "google-cloud-kms-gcs";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Service base URLs, overridable for tests
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub storage: String,
    pub kms: String,
    pub metadata_token: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            storage: "https://storage.googleapis.com".to_string(),
            kms: "https://cloudkms.googleapis.com".to_string(),
            metadata_token: METADATA_TOKEN_URL.to_string(),
        }
    }
}

pub enum TokenSource {
    Metadata,
    Static(Zeroizing<String>),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Metadata => f.write_str("Metadata"),
            TokenSource::Static(_) => f.write_str("Static(<redacted>)"),
        }
    }
}

/// Location of the KMS crypto key and the GCS bucket
#[derive(Debug, Clone)]
pub struct GcsKmsLocation {
    pub kms_project: String,
    pub kms_location: String,
    pub kms_key_ring: String,
    pub kms_crypto_key: String,
    pub bucket: String,
    pub prefix: String,
}

impl GcsKmsLocation {
    fn crypto_key_path(&self) -> String {
        format!(
            "v1/projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            self.kms_project, self.kms_location, self.kms_key_ring, self.kms_crypto_key
        )
    }
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    plaintext: &'a str,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    ciphertext: &'a str,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

/// OAuth2 access token response from the GCE metadata server
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: Zeroizing<String>,
    expires_at: Instant,
}

pub struct GcsKmsKeyStore {
    http: Client,
    location: GcsKmsLocation,
    endpoints: Endpoints,
    token_source: TokenSource,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for GcsKmsKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsKmsKeyStore")
            .field("location", &self.location)
            .field("endpoints", &self.endpoints)
            .field("token_source", &self.token_source)
            .finish_non_exhaustive()
    }
}

impl GcsKmsKeyStore {
    pub fn new(
        http: Client,
        location: GcsKmsLocation,
        endpoints: Endpoints,
        token_source: TokenSource,
    ) -> Self {
        Self {
            http,
            location,
            endpoints,
            token_source,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self, key: &str) -> Result<Zeroizing<String>, KeyStoreError> {
        if let TokenSource::Static(token) = &self.token_source {
            return Ok(token.clone());
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .get(&self.endpoints.metadata_token)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| KeyStoreError::backend("token", key, e))?;
        if !response.status().is_success() {
            return Err(KeyStoreError::backend(
                "token",
                key,
                format!("metadata server returned {}", response.status()),
            ));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| KeyStoreError::backend("token", key, e))?;
        debug!("Retrieved access token from metadata server (Workload Identity)");

        let value = Zeroizing::new(token.access_token);
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    fn object_url(&self, object: &str, media: bool) -> Result<Url, KeyStoreError> {
        let mut url = Url::parse(&self.endpoints.storage)
            .map_err(|e| KeyStoreError::Config(format!("invalid storage endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| KeyStoreError::Config("storage endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", &self.location.bucket, "o", object]);
        if media {
            url.query_pairs_mut().append_pair("alt", "media");
        }
        Ok(url)
    }

    fn upload_url(&self, object: &str) -> Result<Url, KeyStoreError> {
        let mut url = Url::parse(&self.endpoints.storage)
            .map_err(|e| KeyStoreError::Config(format!("invalid storage endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| KeyStoreError::Config("storage endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", &self.location.bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object);
        Ok(url)
    }

    fn kms_url(&self, action: &str) -> String {
        format!(
            "{}/{}:{action}",
            self.endpoints.kms.trim_end_matches('/'),
            self.location.crypto_key_path()
        )
    }

    async fn encrypt(&self, key: &str, plaintext: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        let token = self.access_token(key).await?;
        let encoded = Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(plaintext));
        let response = self
            .http
            .post(self.kms_url("encrypt"))
            .bearer_auth(token.as_str())
            .json(&EncryptRequest {
                plaintext: encoded.as_str(),
            })
            .send()
            .await
            .map_err(|e| KeyStoreError::backend("encrypt", key, e))?;
        let response = check_status(response, "encrypt", key).await?;
        let body: EncryptResponse = response
            .json()
            .await
            .map_err(|e| KeyStoreError::backend("encrypt", key, e))?;
        decode(key, &body.ciphertext)
    }

    async fn decrypt(&self, key: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let token = self.access_token(key).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(ciphertext);
        let response = self
            .http
            .post(self.kms_url("decrypt"))
            .bearer_auth(token.as_str())
            .json(&DecryptRequest {
                ciphertext: &encoded,
            })
            .send()
            .await
            .map_err(|e| KeyStoreError::backend("decrypt", key, e))?;
        let response = check_status(response, "decrypt", key).await?;
        let body: DecryptResponse = response
            .json()
            .await
            .map_err(|e| KeyStoreError::backend("decrypt", key, e))?;
        let plaintext = Zeroizing::new(body.plaintext);
        decode(key, &plaintext).map(Zeroizing::new)
    }
}

async fn check_status(
    response: reqwest::Response,
    operation: &'static str,
    key: &str,
) -> Result<reqwest::Response, KeyStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    metrics::increment_keystore_operation_errors(MODE);
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
    Err(KeyStoreError::backend(
        operation,
        key,
        format!("HTTP {}: {}", status.as_u16(), body),
    ))
}

fn decode(key: &str, value: &str) -> Result<Vec<u8>, KeyStoreError> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| KeyStoreError::Encoding {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl KeyStore for GcsKmsKeyStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let object = object_name_with_prefix(&self.location.prefix, key);
        let span = info_span!(
            "keystore.gcs.set",
            bucket = %self.location.bucket,
            object = %object
        );
        let start = Instant::now();

        async move {
            let ciphertext = self.encrypt(key, value).await?;
            let token = self.access_token(key).await?;
            let response = self
                .http
                .post(self.upload_url(&object)?)
                .bearer_auth(token.as_str())
                .header("Content-Type", "application/octet-stream")
                .body(ciphertext)
                .send()
                .await
                .map_err(|e| KeyStoreError::backend("set", key, e))?;
            check_status(response, "set", key).await?;
            metrics::record_keystore_operation(MODE, "set", start.elapsed().as_secs_f64());
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let object = object_name_with_prefix(&self.location.prefix, key);
        let span = tracing::debug_span!(
            "keystore.gcs.get",
            bucket = %self.location.bucket,
            object = %object
        );
        let start = Instant::now();

        async move {
            let token = self.access_token(key).await?;
            let response = self
                .http
                .get(self.object_url(&object, true)?)
                .bearer_auth(token.as_str())
                .send()
                .await
                .map_err(|e| KeyStoreError::backend("get", key, e))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(KeyStoreError::NotFound {
                    key: key.to_string(),
                });
            }
            let response = check_status(response, "get", key).await?;
            let ciphertext = response
                .bytes()
                .await
                .map_err(|e| KeyStoreError::backend("get", key, e))?;
            let plaintext = self.decrypt(key, &ciphertext).await?;
            metrics::record_keystore_operation(MODE, "get", start.elapsed().as_secs_f64());
            Ok(plaintext)
        }
        .instrument(span)
        .await
    }

    async fn test(&self, key: &str) -> Result<(), KeyStoreError> {
        let object = object_name_with_prefix(&self.location.prefix, key);
        let token = self.access_token(key).await?;
        let response = self
            .http
            .get(self.object_url(&object, false)?)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|e| KeyStoreError::backend("test", key, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response, "test", key).await?;
        Ok(())
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
        let KeyStoreConfig::GoogleKmsGcs {
            kms_project,
            kms_location,
            kms_key_ring,
            kms_crypto_key,
            bucket,
            prefix,
        } = config
        else {
            return Err(KeyStoreError::Config(format!(
                "gcs factory cannot build '{}' backend",
                config.mode()
            )));
        };
        let http = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| KeyStoreError::Config(format!("failed to create HTTP client: {e}")))?;
        let location = GcsKmsLocation {
            kms_project: kms_project.clone(),
            kms_location: kms_location.clone(),
            kms_key_ring: kms_key_ring.clone(),
            kms_crypto_key: kms_crypto_key.clone(),
            bucket: bucket.clone(),
            prefix: prefix.clone(),
        };
        Ok(Arc::new(GcsKmsKeyStore::new(
            http,
            location,
            Endpoints::default(),
            TokenSource::Metadata,
        )))
    }
}
