//! # Vault Operator
//!
//! A Kubernetes operator that runs Vault clusters described by `Vault`
//! resources (`vault.banzaicloud.com/v1alpha1`).
//!
//! For every `Vault` the operator maintains:
//!
//! 1. **TLS material** - a CA plus server certificate for Vault, and for etcd storage a
//!    second CA with server, peer and client certificates
//! 2. **etcd** - an `EtcdCluster` for the etcd-operator when `storage.etcd` is configured
//! 3. **Vault servers** - a Deployment whose pods carry an unseal sidecar
//! 4. **Service** - port 8200 in front of the server pods
//! 5. **Configurer** - a Deployment applying policies, auth methods and secret engines
//!
//! Configuration comes from environment variables, see
//! [`vault_operator::config::ControllerConfig`].

use anyhow::Result;
use vault_operator::observability;
use vault_operator::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    let result = run_watch_loop(
        init.vaults,
        init.deployments,
        init.reconciler,
        init.server_state,
        init.config,
    )
    .await;

    observability::shutdown_otel(init.otel_tracer_provider);
    result
}
