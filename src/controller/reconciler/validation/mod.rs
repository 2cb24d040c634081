//! # Validation
//!
//! Checks a `Vault` resource before any object is created for it.

mod duration;

pub use duration::{parse_kubernetes_duration, DurationError};

use crate::controller::reconciler::types::ReconcilerError;
use crate::crd::{Vault, HA_STORAGE_TYPES};

/// Validate a `Vault` resource.
///
/// More than one replica needs an HA-capable storage backend. The unseal
/// period must parse, and an etcd backend needs an address.
pub fn validate_vault(vault: &Vault) -> Result<(), ReconcilerError> {
    let spec = &vault.spec;

    if spec.size < 0 {
        return Err(ReconcilerError::Validation(format!(
            "size must not be negative, got {}",
            spec.size
        )));
    }

    if spec.size > 1 && !spec.has_ha_storage() {
        return Err(ReconcilerError::Validation(format!(
            "size {} requires an HA storage backend ({}) with ha_enabled set, got '{}'",
            spec.size,
            HA_STORAGE_TYPES.join(", "),
            spec.storage_type().unwrap_or("none")
        )));
    }

    parse_kubernetes_duration(&spec.unseal_config.options.period).map_err(|e| {
        ReconcilerError::Validation(format!("unsealConfig.options.period: {e}"))
    })?;

    if spec.uses_etcd() && spec.etcd_address().is_none() {
        return Err(ReconcilerError::Validation(
            "etcd storage requires config.storage.etcd.address".to_string(),
        ));
    }

    Ok(())
}
