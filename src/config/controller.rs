//! # Controller Configuration
//!
//! Operator-level settings loaded from environment variables.

use std::time::Duration;

/// Operator-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Requeue interval after a successful pass (seconds)
    pub reconcile_resync_secs: u64,
    /// Fibonacci backoff lower bound for failed passes (minutes)
    pub backoff_min_minutes: u64,
    /// Fibonacci backoff upper bound for failed passes (minutes)
    pub backoff_max_minutes: u64,
    /// Watch stream restart delay after errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Image used for the unseal sidecar and the configurer when the
    /// descriptor does not name one
    pub default_unsealer_image: String,
    /// Namespace to watch; empty means all namespaces
    pub watch_namespace: String,
    /// Port for the metrics and probe server
    pub metrics_port: u16,
    /// Validity of generated TLS material, as a duration string
    pub certificate_validity: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            reconcile_resync_secs: DEFAULT_RECONCILE_RESYNC_SECS,
            backoff_min_minutes: DEFAULT_BACKOFF_MIN_MINUTES,
            backoff_max_minutes: DEFAULT_BACKOFF_MAX_MINUTES,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            default_unsealer_image: DEFAULT_UNSEALER_IMAGE.to_string(),
            watch_namespace: String::new(),
            metrics_port: DEFAULT_METRICS_PORT,
            certificate_validity: CERTIFICATE_VALIDITY.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            reconcile_resync_secs: env_var_or_default(
                "RECONCILE_RESYNC_SECS",
                DEFAULT_RECONCILE_RESYNC_SECS,
            ),
            backoff_min_minutes: env_var_or_default(
                "BACKOFF_MIN_MINUTES",
                DEFAULT_BACKOFF_MIN_MINUTES,
            ),
            backoff_max_minutes: env_var_or_default(
                "BACKOFF_MAX_MINUTES",
                DEFAULT_BACKOFF_MAX_MINUTES,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            default_unsealer_image: env_var_or_default_str(
                "UNSEALER_IMAGE",
                DEFAULT_UNSEALER_IMAGE,
            ),
            watch_namespace: env_var_or_default_str("WATCH_NAMESPACE", ""),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            certificate_validity: env_var_or_default_str(
                "CERTIFICATE_VALIDITY",
                CERTIFICATE_VALIDITY,
            ),
        }
    }

    /// Get the requeue duration after a successful pass
    pub fn resync_duration(&self) -> Duration {
        Duration::from_secs(self.reconcile_resync_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
