//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::Vault;
use crate::observability;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Decide when a failed `Vault` is retried.
///
/// Validation errors wait for the descriptor to change. Everything else is
/// retried with a Fibonacci backoff tracked per resource.
pub fn handle_reconciliation_error(
    obj: Arc<Vault>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("default");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    observability::metrics::increment_reconciliation_errors();

    if error.is_validation() {
        warn!(
            "Vault {}/{} is invalid, waiting for a spec change: {}",
            namespace, name, error
        );
        observability::metrics::increment_requeues_total("await-change");
        return Action::await_change();
    }

    error!("Reconciliation error for {}/{}: {:?}", namespace, name, error);

    let resource_key = format!("{namespace}/{name}");
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key).or_insert_with(|| {
                BackoffState::new(
                    ctx.config.backoff_min_minutes,
                    ctx.config.backoff_max_minutes,
                )
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (60, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "Retrying with Fibonacci backoff: {}s (error count: {}), next attempt at {}",
        backoff_seconds,
        error_count,
        next_trigger_time.to_rfc3339()
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(std::time::Duration::from_secs(backoff_seconds))
}

/// Classify a watch stream error and wait where the cause calls for it.
///
/// Returns `None` to drop the error and let the stream restart, or `Some(())`
/// to pass it through.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay_secs: u64,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    // 404 first: a plain-text 404 body surfaces as a serde error mentioning WatchFailed
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 =
        (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        error!("Watch authentication failed (401 Unauthorized), RBAC may have been revoked or the token expired");
        error!("Check: kubectl auth can-i watch vaults.vault.banzaicloud.com --as=system:serviceaccount:<ns>:vault-operator");
        warn!(
            "Waiting {}s before retrying watch",
            watch_restart_delay_secs
        );
        tokio::time::sleep(std::time::Duration::from_secs(watch_restart_delay_secs)).await;
        None
    } else if is_410 {
        warn!(error_type = "410", "Watch resource version expired, watch will restart");
        None
    } else if is_429 {
        let current_backoff = backoff.load(Ordering::Relaxed);
        warn!(
            "API server storage reinitializing (429), backing off for {}ms before restart",
            current_backoff
        );
        tokio::time::sleep(std::time::Duration::from_millis(current_backoff)).await;
        backoff.store(
            std::cmp::min(current_backoff.saturating_mul(2), max_backoff_ms),
            Ordering::Relaxed,
        );
        None
    } else if is_not_found {
        warn!(
            "Watched resource not found (404), the Vault CRD may be missing. Error: {}",
            error_string
        );
        Some(())
    } else {
        error!("Controller stream error: {}", error_string);
        tokio::time::sleep(std::time::Duration::from_secs(watch_restart_delay_secs)).await;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::controller::reconciler::store::MockObjectStore;
    use crate::crd::VaultSpec;
    use std::time::Duration;

    fn context() -> Arc<Reconciler> {
        Arc::new(Reconciler::new(Arc::new(MockObjectStore::new()), ControllerConfig::default()).unwrap())
    }

    fn vault() -> Arc<Vault> {
        let mut vault = Vault::new("vault", VaultSpec::default());
        vault.metadata.namespace = Some("default".to_string());
        Arc::new(vault)
    }

    #[test]
    fn test_validation_error_awaits_change() {
        let ctx = context();
        let action = handle_reconciliation_error(
            vault(),
            &ReconcilerError::Validation("size".to_string()),
            ctx.clone(),
        );
        assert_eq!(action, Action::await_change());
        assert!(ctx.backoff_states.lock().unwrap().is_empty());
    }

    #[test]
    fn test_other_errors_back_off_per_resource() {
        let ctx = context();
        let error = ReconcilerError::InvalidSpec("no uid".to_string());

        let delays: Vec<Action> = (0..3)
            .map(|_| handle_reconciliation_error(vault(), &error, ctx.clone()))
            .collect();
        assert_eq!(
            delays,
            vec![
                Action::requeue(Duration::from_secs(60)),
                Action::requeue(Duration::from_secs(60)),
                Action::requeue(Duration::from_secs(120)),
            ]
        );

        ctx.reset_backoff("default/vault");
        let action = handle_reconciliation_error(vault(), &error, ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_doubles_backoff() {
        let backoff = Arc::new(AtomicU64::new(500));
        let result = handle_watch_stream_error("429 TooManyRequests", &backoff, 800, 5).await;
        assert!(result.is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 800);
    }

    #[tokio::test]
    async fn test_not_found_passes_through() {
        let backoff = Arc::new(AtomicU64::new(500));
        let result = handle_watch_stream_error("ObjectNotFound 404", &backoff, 800, 5).await;
        assert!(result.is_some());
    }
}
