//! # AWS Secrets Manager Key Store
//!
//! Each key is a binary secret named `prefix + key`. New secrets are
//! encrypted with the configured KMS key, or the account default when none
//! is given. Credentials come from the default AWS provider chain (IRSA on
//! EKS).

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_secretsmanager::primitives::Blob;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, Instrument};
use zeroize::Zeroizing;

use super::{
    object_name_with_prefix, BackendOptions, KeyStore, KeyStoreConfig, KeyStoreError,
    KeyStoreFactory,
};
use crate::observability::metrics;

pub const MODE: &str = "aws-secrets-manager";

pub struct AwsSecretsManagerKeyStore {
    client: SecretsManagerClient,
    region: String,
    kms_key_id: Option<String>,
    prefix: String,
}

impl std::fmt::Debug for AwsSecretsManagerKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSecretsManagerKeyStore")
            .field("region", &self.region)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl AwsSecretsManagerKeyStore {
    pub async fn new(
        region: &str,
        kms_key_id: Option<String>,
        prefix: &str,
        timeout: Duration,
    ) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
            .load()
            .await;
        Self::with_client(SecretsManagerClient::new(&sdk_config), region, kms_key_id, prefix)
    }

    /// A store over an already configured SDK client.
    pub fn with_client(
        client: SecretsManagerClient,
        region: &str,
        kms_key_id: Option<String>,
        prefix: &str,
    ) -> Self {
        Self {
            client,
            region: region.to_string(),
            kms_key_id,
            prefix: prefix.to_string(),
        }
    }

    fn fail(operation: &'static str, key: &str, reason: impl std::fmt::Display) -> KeyStoreError {
        metrics::increment_keystore_operation_errors(MODE);
        KeyStoreError::backend(operation, key, reason)
    }
}

#[async_trait]
impl KeyStore for AwsSecretsManagerKeyStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let secret_name = object_name_with_prefix(&self.prefix, key);
        let span = info_span!(
            "keystore.aws.set",
            secret.name = %secret_name,
            region = %self.region
        );
        let start = Instant::now();

        async move {
            let updated = self
                .client
                .put_secret_value()
                .secret_id(&secret_name)
                .secret_binary(Blob::new(value.to_vec()))
                .send()
                .await;

            match updated {
                Ok(_) => {}
                Err(e)
                    if e.as_service_error()
                        .is_some_and(|se| se.is_resource_not_found_exception()) =>
                {
                    info!("Creating AWS secret: {}", secret_name);
                    self.client
                        .create_secret()
                        .name(&secret_name)
                        .set_kms_key_id(self.kms_key_id.clone())
                        .secret_binary(Blob::new(value.to_vec()))
                        .send()
                        .await
                        .map_err(|e| Self::fail("set", key, e))?;
                }
                Err(e) => return Err(Self::fail("set", key, e)),
            }

            metrics::record_keystore_operation(MODE, "set", start.elapsed().as_secs_f64());
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let secret_name = object_name_with_prefix(&self.prefix, key);
        let span = tracing::debug_span!(
            "keystore.aws.get",
            secret.name = %secret_name,
            region = %self.region
        );
        let start = Instant::now();

        async move {
            let response = match self
                .client
                .get_secret_value()
                .secret_id(&secret_name)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e)
                    if e.as_service_error()
                        .is_some_and(|se| se.is_resource_not_found_exception()) =>
                {
                    return Err(KeyStoreError::NotFound {
                        key: key.to_string(),
                    });
                }
                Err(e) => return Err(Self::fail("get", key, e)),
            };

            metrics::record_keystore_operation(MODE, "get", start.elapsed().as_secs_f64());
            if let Some(blob) = response.secret_binary() {
                return Ok(Zeroizing::new(blob.as_ref().to_vec()));
            }
            if let Some(text) = response.secret_string() {
                return Ok(Zeroizing::new(text.as_bytes().to_vec()));
            }
            Err(KeyStoreError::Encoding {
                key: key.to_string(),
                reason: "secret has no string or binary value".to_string(),
            })
        }
        .instrument(span)
        .await
    }

    async fn test(&self, key: &str) -> Result<(), KeyStoreError> {
        self.client
            .list_secrets()
            .max_results(1)
            .send()
            .await
            .map_err(|e| Self::fail("test", key, e))?;
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
        let KeyStoreConfig::AwsSecretsManager {
            region,
            kms_key_id,
            prefix,
        } = config
        else {
            return Err(KeyStoreError::Config(format!(
                "aws factory cannot build '{}' backend",
                config.mode()
            )));
        };
        if region.is_empty() {
            return Err(KeyStoreError::Config("aws region must not be empty".to_string()));
        }
        Ok(Arc::new(
            AwsSecretsManagerKeyStore::new(region, kms_key_id.clone(), prefix, options.timeout).await,
        ))
    }
}
