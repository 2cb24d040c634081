//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::store::{ObjectStore, StoreError};
use crate::controller::reconciler::validation::parse_kubernetes_duration;
use crate::crd::Vault;
use crate::pki::PkiError;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The resource can never reconcile as written; wait for a spec change.
    #[error("invalid Vault resource: {0}")]
    Validation(String),

    #[error("failed to generate TLS material: {0}")]
    Pki(#[from] PkiError),

    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid resource: {0}")]
    InvalidSpec(String),
}

impl ReconcilerError {
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, ReconcilerError::Validation(_))
    }
}

/// A cluster descriptor the operator manages
#[derive(Debug, Clone)]
pub enum Descriptor {
    Vault(Arc<Vault>),
}

/// What happened to a descriptor
#[derive(Debug, Clone)]
pub enum Event {
    Applied(Descriptor),
    Deleted(Descriptor),
}

impl Event {
    /// Classify a watched object. Objects marked for deletion are `Deleted`.
    #[must_use]
    pub fn from_vault(vault: Arc<Vault>) -> Self {
        if vault.metadata.deletion_timestamp.is_some() {
            Event::Deleted(Descriptor::Vault(vault))
        } else {
            Event::Applied(Descriptor::Vault(vault))
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ObjectStore>,
    pub config: ControllerConfig,
    /// Validity of generated certificates, parsed from `config`
    pub certificate_validity: Duration,
    // Backoff state per resource (identified by namespace/name), owned by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("certificate_validity", &self.certificate_validity)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, config: ControllerConfig) -> Result<Self> {
        let certificate_validity = parse_kubernetes_duration(&config.certificate_validity)
            .with_context(|| {
                format!(
                    "invalid CERTIFICATE_VALIDITY '{}'",
                    config.certificate_validity
                )
            })?;
        Ok(Self {
            store,
            config,
            certificate_validity,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Forget the backoff for a resource after a successful pass.
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
