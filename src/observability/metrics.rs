//! # Metrics
//!
//! Prometheus metrics for monitoring the operator and the unsealer.
//!
//! ## Metrics Exposed
//!
//! - `vault_operator_reconciliations_total` - Total number of reconciliations
//! - `vault_operator_reconciliation_errors_total` - Total number of reconciliation errors
//! - `vault_operator_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `vault_operator_objects_created_total` - Managed objects created, by kind
//! - `vault_operator_objects_updated_total` - Managed objects patched, by kind
//! - `vault_operator_requeues_total` - Requeues, by reason
//! - `vault_operator_certificates_generated_total` - TLS bundles generated
//! - `vault_operator_keystore_operations_total` - Key store calls, by backend and operation
//! - `vault_operator_keystore_operation_errors_total` - Failed key store calls, by backend
//! - `vault_operator_keystore_operation_duration_seconds` - Key store call duration
//! - `vault_operator_unseal_attempts_total` - Unseal attempts, by outcome

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static OBJECTS_CREATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_operator_objects_created_total",
            "Total number of managed objects created",
        ),
        &["kind"],
    )
    .expect("Failed to create OBJECTS_CREATED_TOTAL metric - this should never happen")
});

static OBJECTS_UPDATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_operator_objects_updated_total",
            "Total number of managed objects patched",
        ),
        &["kind"],
    )
    .expect("Failed to create OBJECTS_UPDATED_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("vault_operator_requeues_total", "Total number of requeues"),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static CERTIFICATES_GENERATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_operator_certificates_generated_total",
        "Total number of TLS bundles generated",
    )
    .expect("Failed to create CERTIFICATES_GENERATED_TOTAL metric - this should never happen")
});

static KEYSTORE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_operator_keystore_operations_total",
            "Total number of key store operations",
        ),
        &["backend", "operation"],
    )
    .expect("Failed to create KEYSTORE_OPERATIONS_TOTAL metric - this should never happen")
});

static KEYSTORE_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_operator_keystore_operation_errors_total",
            "Total number of failed key store operations",
        ),
        &["backend"],
    )
    .expect("Failed to create KEYSTORE_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static KEYSTORE_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "vault_operator_keystore_operation_duration_seconds",
            "Duration of key store operations in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["backend", "operation"],
    )
    .expect("Failed to create KEYSTORE_OPERATION_DURATION metric - this should never happen")
});

static UNSEAL_ATTEMPTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_operator_unseal_attempts_total",
            "Total number of unseal attempts",
        ),
        &["outcome"],
    )
    .expect("Failed to create UNSEAL_ATTEMPTS_TOTAL metric - this should never happen")
});

/// Register all metrics with the registry. Call once per process.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_UPDATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATES_GENERATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEYSTORE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEYSTORE_OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEYSTORE_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(UNSEAL_ATTEMPTS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_objects_created(kind: &str) {
    OBJECTS_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_objects_updated(kind: &str) {
    OBJECTS_UPDATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_certificates_generated() {
    CERTIFICATES_GENERATED_TOTAL.inc();
}

pub fn record_keystore_operation(backend: &str, operation: &str, duration: f64) {
    KEYSTORE_OPERATIONS_TOTAL
        .with_label_values(&[backend, operation])
        .inc();
    KEYSTORE_OPERATION_DURATION
        .with_label_values(&[backend, operation])
        .observe(duration);
}

pub fn increment_keystore_operation_errors(backend: &str) {
    KEYSTORE_OPERATION_ERRORS_TOTAL
        .with_label_values(&[backend])
        .inc();
}

pub fn increment_unseal_attempts(outcome: &str) {
    UNSEAL_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_counters_track_values() {
        let before = OBJECTS_CREATED_TOTAL.with_label_values(&["Secret"]).get();
        increment_objects_created("Secret");
        assert_eq!(
            OBJECTS_CREATED_TOTAL.with_label_values(&["Secret"]).get(),
            before + 1
        );
    }
}
