//! # Initialization
//!
//! Operator startup: rustls provider, tracing, metrics, the probe server,
//! the Kubernetes client and the reconciler context.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{KubeObjectStore, Reconciler};
use crate::controller::server::{start_server, ServerState};
use crate::crd::Vault;
use crate::observability;
use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

const SERVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything the watch loop needs
pub struct InitializationResult {
    pub vaults: Api<Vault>,
    pub deployments: Api<Deployment>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub config: ControllerConfig,
    pub otel_tracer_provider: Option<observability::TracerProviderHandle>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let otel_tracer_provider = observability::init_tracing("vault-operator", "vault_operator=info")
        .context("Failed to initialize tracing")?;
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let config = ControllerConfig::from_env();
    info!(?config, "Loaded operator configuration");

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = server_state.clone();
    let metrics_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let (vaults, deployments) = if config.watch_namespace.is_empty() {
        info!("Watching Vault resources in all namespaces");
        (Api::all(client.clone()), Api::all(client.clone()))
    } else {
        info!("Watching Vault resources in namespace {}", config.watch_namespace);
        (
            Api::namespaced(client.clone(), &config.watch_namespace),
            Api::namespaced(client.clone(), &config.watch_namespace),
        )
    };

    let store = Arc::new(KubeObjectStore::new(client));
    let reconciler = Arc::new(Reconciler::new(store, config.clone())?);

    info!("Operator initialized, starting watch loop...");
    Ok(InitializationResult {
        vaults,
        deployments,
        reconciler,
        server_state,
        config,
        otel_tracer_provider,
    })
}

async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > SERVER_STARTUP_TIMEOUT {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                SERVER_STARTUP_TIMEOUT.as_secs()
            ));
        }
        tokio::time::sleep(SERVER_POLL_INTERVAL).await;
    }
}
