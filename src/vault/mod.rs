//! # Vault
//!
//! The Vault control API seam ([`VaultApi`]), its reqwest implementation,
//! the unseal/init state machine and the one-shot configurer.

pub mod client;
pub mod configure;
pub mod unseal;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
use mockall::automock;

pub use client::VaultClient;

/// Vault API errors
#[derive(Debug, Error)]
pub enum VaultApiError {
    #[error("request to {path} failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned HTTP {status}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },

    #[error("invalid Vault TLS client configuration: {0}")]
    Tls(String),
}

/// `GET /v1/sys/seal-status` and `PUT /v1/sys/unseal` response
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SealStatus {
    pub sealed: bool,
    #[serde(default)]
    pub initialized: bool,
    /// Required number of shares
    #[serde(default, rename = "t")]
    pub threshold: u32,
    /// Total number of shares
    #[serde(default, rename = "n")]
    pub shares: u32,
    /// Shares submitted towards the current unseal
    #[serde(default)]
    pub progress: u32,
}

/// `POST /v1/sys/init` request body
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct InitRequest {
    pub secret_shares: u32,
    pub secret_threshold: u32,
}

/// `POST /v1/sys/init` response. Wiped on drop.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct InitResponse {
    pub keys: Vec<String>,
    #[serde(default)]
    pub keys_base64: Vec<String>,
    pub root_token: String,
}

impl std::fmt::Debug for InitResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitResponse")
            .field("keys", &format_args!("<{} redacted>", self.keys.len()))
            .field("root_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// `GET /v1/sys/health` response
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub standby: bool,
    #[serde(default)]
    pub version: String,
}

/// An enabled auth method or secrets engine
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MountInfo {
    #[serde(rename = "type")]
    pub mount_type: String,
    #[serde(default)]
    pub description: String,
}

/// Body of `POST /v1/sys/auth/<path>` and `POST /v1/sys/mounts/<path>`
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MountRequest {
    #[serde(rename = "type")]
    pub mount_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, serde_json::Value>,
}

/// The Vault control API used by the unsealer and the configurer.
///
/// Token arguments are sent as `X-Vault-Token` and never logged.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VaultApi: Send + Sync {
    /// `GET /v1/sys/init`
    async fn init_status(&self) -> Result<bool, VaultApiError>;

    /// `POST /v1/sys/init`
    async fn init(&self, request: &InitRequest) -> Result<InitResponse, VaultApiError>;

    /// `GET /v1/sys/seal-status`
    async fn seal_status(&self) -> Result<SealStatus, VaultApiError>;

    /// `PUT /v1/sys/unseal` with one key share
    async fn unseal(&self, key: &str) -> Result<SealStatus, VaultApiError>;

    /// `GET /v1/sys/health`
    async fn health(&self) -> Result<HealthStatus, VaultApiError>;

    /// Create a root-policy token with the given id
    async fn create_token(&self, auth_token: &str, id: &str) -> Result<(), VaultApiError>;

    /// Revoke the calling token
    async fn revoke_self(&self, token: &str) -> Result<(), VaultApiError>;

    /// `PUT /v1/sys/policies/acl/<name>`
    async fn put_policy(&self, token: &str, name: &str, rules: &str) -> Result<(), VaultApiError>;

    /// `GET /v1/sys/auth`, keyed by mount path with trailing slash
    async fn list_auth(&self, token: &str) -> Result<BTreeMap<String, MountInfo>, VaultApiError>;

    /// `POST /v1/sys/auth/<path>`
    async fn enable_auth(
        &self,
        token: &str,
        path: &str,
        request: &MountRequest,
    ) -> Result<(), VaultApiError>;

    /// `GET /v1/sys/mounts`, keyed by mount path with trailing slash
    async fn list_mounts(&self, token: &str) -> Result<BTreeMap<String, MountInfo>, VaultApiError>;

    /// `POST /v1/sys/mounts/<path>`
    async fn mount(
        &self,
        token: &str,
        path: &str,
        request: &MountRequest,
    ) -> Result<(), VaultApiError>;
}
