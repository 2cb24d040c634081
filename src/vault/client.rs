//! # Vault HTTP Client
//!
//! reqwest implementation of [`VaultApi`]. The server certificate is checked
//! against the CA in `VAULT_CACERT` when one is configured.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{
    HealthStatus, InitRequest, InitResponse, MountInfo, MountRequest, SealStatus, VaultApi,
    VaultApiError,
};

const TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Debug, Clone)]
pub struct VaultClient {
    http: Client,
    addr: String,
}

impl VaultClient {
    /// Build a client for `addr`, trusting `ca_cert` in addition to the
    /// bundled roots.
    pub fn new(
        addr: &str,
        ca_cert: Option<&Path>,
        timeout: Duration,
    ) -> Result<Self, VaultApiError> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(path) = ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                VaultApiError::Tls(format!("failed to read CA file {}: {e}", path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                VaultApiError::Tls(format!("invalid CA file {}: {e}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| VaultApiError::Tls(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(http, addr))
    }

    pub fn with_client(http: Client, addr: &str) -> Self {
        Self {
            http,
            addr: addr.trim_end_matches('/').to_string(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.addr, path));
        match token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send(&self, path: &str, builder: RequestBuilder) -> Result<Response, VaultApiError> {
        debug!("Vault request {}", path);
        let response = builder.send().await.map_err(|source| VaultApiError::Http {
            path: path.to_string(),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.text().await {
            Ok(raw) => error_message(&raw),
            Err(e) => format!("unreadable error body: {e}"),
        };
        Err(VaultApiError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<T, VaultApiError> {
        self.send(path, builder)
            .await?
            .json()
            .await
            .map_err(|source| VaultApiError::Http {
                path: path.to_string(),
                source,
            })
    }

    async fn mounts(&self, path: &str, token: &str) -> Result<BTreeMap<String, MountInfo>, VaultApiError> {
        let body: serde_json::Value = self
            .json(path, self.request(Method::GET, path, Some(token)))
            .await?;
        Ok(parse_mount_table(body))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

const MAX_RAW_ERROR_CHARS: usize = 256;

/// Vault's `errors` list, or the raw body when it is not one.
fn error_message(raw: &str) -> String {
    match serde_json::from_str::<ErrorBody>(raw) {
        Ok(body) => body.errors.join("; "),
        Err(e) => {
            let excerpt: String = raw.trim().chars().take(MAX_RAW_ERROR_CHARS).collect();
            format!("undecodable error body ({e}): {excerpt}")
        }
    }
}

#[derive(Deserialize)]
struct InitStatusBody {
    initialized: bool,
}

/// Mount listings carry the table under `data` and, for older clients, at
/// the top level next to request metadata.
fn parse_mount_table(body: serde_json::Value) -> BTreeMap<String, MountInfo> {
    let table = match body.get("data") {
        Some(data) if data.is_object() => data.clone(),
        _ => body,
    };
    let serde_json::Value::Object(entries) = table else {
        return BTreeMap::new();
    };
    entries
        .into_iter()
        .filter(|(path, _)| path.ends_with('/'))
        .filter_map(|(path, value)| {
            serde_json::from_value::<MountInfo>(value)
                .ok()
                .map(|info| (path, info))
        })
        .collect()
}

#[async_trait]
impl VaultApi for VaultClient {
    async fn init_status(&self) -> Result<bool, VaultApiError> {
        let path = "/v1/sys/init";
        let body: InitStatusBody = self.json(path, self.request(Method::GET, path, None)).await?;
        Ok(body.initialized)
    }

    async fn init(&self, request: &InitRequest) -> Result<InitResponse, VaultApiError> {
        let path = "/v1/sys/init";
        self.json(path, self.request(Method::POST, path, None).json(request))
            .await
    }

    async fn seal_status(&self) -> Result<SealStatus, VaultApiError> {
        let path = "/v1/sys/seal-status";
        self.json(path, self.request(Method::GET, path, None)).await
    }

    async fn unseal(&self, key: &str) -> Result<SealStatus, VaultApiError> {
        let path = "/v1/sys/unseal";
        let body = serde_json::json!({ "key": key });
        self.json(path, self.request(Method::PUT, path, None).json(&body))
            .await
    }

    async fn health(&self) -> Result<HealthStatus, VaultApiError> {
        // Report sealed and uninitialized nodes with 200 so the body is readable.
        let path = "/v1/sys/health?standbyok=true&sealedcode=200&uninitcode=200";
        self.json(path, self.request(Method::GET, path, None)).await
    }

    async fn create_token(&self, auth_token: &str, id: &str) -> Result<(), VaultApiError> {
        let path = "/v1/auth/token/create";
        let body = serde_json::json!({ "id": id, "policies": ["root"] });
        self.send(
            path,
            self.request(Method::POST, path, Some(auth_token)).json(&body),
        )
        .await?;
        Ok(())
    }

    async fn revoke_self(&self, token: &str) -> Result<(), VaultApiError> {
        let path = "/v1/auth/token/revoke-self";
        self.send(path, self.request(Method::POST, path, Some(token)))
            .await?;
        Ok(())
    }

    async fn put_policy(&self, token: &str, name: &str, rules: &str) -> Result<(), VaultApiError> {
        let path = format!("/v1/sys/policies/acl/{name}");
        let body = serde_json::json!({ "policy": rules });
        self.send(
            &path,
            self.request(Method::PUT, &path, Some(token)).json(&body),
        )
        .await?;
        Ok(())
    }

    async fn list_auth(&self, token: &str) -> Result<BTreeMap<String, MountInfo>, VaultApiError> {
        self.mounts("/v1/sys/auth", token).await
    }

    async fn enable_auth(
        &self,
        token: &str,
        path: &str,
        request: &MountRequest,
    ) -> Result<(), VaultApiError> {
        let path = format!("/v1/sys/auth/{}", path.trim_matches('/'));
        self.send(
            &path,
            self.request(Method::POST, &path, Some(token)).json(request),
        )
        .await?;
        Ok(())
    }

    async fn list_mounts(&self, token: &str) -> Result<BTreeMap<String, MountInfo>, VaultApiError> {
        self.mounts("/v1/sys/mounts", token).await
    }

    async fn mount(
        &self,
        token: &str,
        path: &str,
        request: &MountRequest,
    ) -> Result<(), VaultApiError> {
        let path = format!("/v1/sys/mounts/{}", path.trim_matches('/'));
        self.send(
            &path,
            self.request(Method::POST, &path, Some(token)).json(request),
        )
        .await?;
        Ok(())
    }
}
