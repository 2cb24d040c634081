//! # Watch Loop
//!
//! Runs the kube-runtime controller over `Vault` resources and the
//! deployments they own, restarting the watch when the stream ends.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Vault;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use kube_runtime::{watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Initial delay after a 429 from the API server (milliseconds)
const WATCH_BACKOFF_START_MS: u64 = 500;
const WATCH_BACKOFF_MAX_MS: u64 = 30_000;

pub async fn run_watch_loop(
    vaults: Api<Vault>,
    deployments: Api<Deployment>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: ControllerConfig,
) -> Result<(), anyhow::Error> {
    let backoff_duration_ms = Arc::new(AtomicU64::new(WATCH_BACKOFF_START_MS));

    // Kubernetes sends SIGTERM; readiness drops before the controller drains
    let shutdown_server_state = server_state.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = backoff_duration_ms.clone();
        let watch_restart_delay_secs = config.watch_restart_delay_secs;
        let watch_span = tracing::info_span!("controller.watch", operation = "watch_loop");

        info!("Starting controller watch loop...");
        Controller::new(vaults.clone(), watcher::Config::default().any_semantic())
            .owns(deployments.clone(), watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, reconciler.clone())
            .filter_map(move |result| {
                let backoff = backoff.clone();
                async move {
                    match &result {
                        Ok((object, action)) => {
                            backoff.store(WATCH_BACKOFF_START_MS, Ordering::Relaxed);
                            debug!(resource = %object, action = ?action, "watch.event.reconciled");
                            Some(result)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                WATCH_BACKOFF_MAX_MS,
                                watch_restart_delay_secs,
                            )
                            .await
                            .map(|()| result)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = config.watch_restart_delay_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}
