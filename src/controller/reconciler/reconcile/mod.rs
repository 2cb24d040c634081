//! # Reconcile
//!
//! Entry point called by the kube-runtime controller for every delivered
//! `Vault`. Deleted descriptors are left to the garbage collector; applied
//! ones get a full [`sync::sync_vault`] pass and a resync requeue.

mod sync;

pub use sync::sync_vault;

use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, Instrument};

use crate::controller::reconciler::types::{Descriptor, Event, Reconciler, ReconcilerError};
use crate::crd::Vault;
use crate::observability;

pub async fn reconcile(vault: Arc<Vault>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    observability::metrics::increment_reconciliations();

    match Event::from_vault(vault) {
        Event::Deleted(Descriptor::Vault(vault)) => {
            debug!(
                "Vault {} is being deleted, owned objects are garbage collected",
                vault.name_any()
            );
            Ok(Action::await_change())
        }
        Event::Applied(Descriptor::Vault(vault)) => {
            let start = Instant::now();
            let name = vault.name_any();
            let namespace = vault.namespace().unwrap_or_else(|| "default".to_string());
            let span = tracing::info_span!(
                "reconcile",
                resource.name = name.as_str(),
                resource.namespace = namespace.as_str(),
                resource.size = vault.spec.size,
                storage = vault.spec.storage_type().unwrap_or("none"),
            );

            sync_vault(&vault, &ctx).instrument(span).await?;

            observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
            ctx.reset_backoff(&format!("{namespace}/{name}"));

            let resync = ctx.config.resync_duration();
            info!(
                "Reconciled Vault {}/{} in {:.2}s, next pass in {}s",
                namespace,
                name,
                start.elapsed().as_secs_f64(),
                resync.as_secs()
            );
            observability::metrics::increment_requeues_total("resync");
            Ok(Action::requeue(resync))
        }
    }
}
