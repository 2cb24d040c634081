//! # Constants
//!
//! Shared constants used throughout the operator and the unsealer.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default requeue interval after a successful reconciliation (seconds)
pub const DEFAULT_RECONCILE_RESYNC_SECS: u64 = 300;

/// Fibonacci backoff bounds for failed reconciliations (minutes)
pub const DEFAULT_BACKOFF_MIN_MINUTES: u64 = 1;
pub const DEFAULT_BACKOFF_MAX_MINUTES: u64 = 10;

/// Default delay before restarting watch stream after errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default unsealer image used for the sidecar and the configurer
pub const DEFAULT_UNSEALER_IMAGE: &str = "banzaicloud/bank-vaults:latest";

/// Default Vault server image
pub const DEFAULT_VAULT_IMAGE: &str = "vault:latest";

/// Client-side timeout for Vault, key store and cloud API calls (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Validity of generated certificates
pub const CERTIFICATE_VALIDITY: &str = "8760h";

/// Vault control port, exposed by the server container and the Service
pub const VAULT_PORT: i32 = 8200;

/// Address the unseal sidecar talks to
pub const DEFAULT_VAULT_ADDR: &str = "https://127.0.0.1:8200";

/// CA bundle path mounted from the `<name>-tls` secret
pub const VAULT_CACERT_PATH: &str = "/vault/tls/ca.crt";

/// ConfigMap key consumed by the configurer
pub const DEFAULT_CONFIG_FILE: &str = "vault-config.yml";

/// Environment variable carrying the serialized owner reference into the sidecar
pub const ENV_K8S_OWNER_REFERENCE: &str = "K8S_OWNER_REFERENCE";
pub const ENV_VAULT_ADDR: &str = "VAULT_ADDR";
pub const ENV_VAULT_CACERT: &str = "VAULT_CACERT";

/// Pinned etcd version for managed clusters (newer releases break the static TLS bootstrap)
pub const ETCD_VERSION: &str = "3.1.15";
pub const ETCD_CLUSTER_SIZE: i32 = 3;

/// etcd-operator client certificate file names
pub const ETCD_CLIENT_CA_FILE: &str = "etcd-client-ca.crt";
pub const ETCD_CLIENT_CERT_FILE: &str = "etcd-client.crt";
pub const ETCD_CLIENT_KEY_FILE: &str = "etcd-client.key";

/// Mount path of the etcd client TLS secret inside the Vault container
pub const ETCD_TLS_MOUNT_PATH: &str = "/etcd/tls";

/// Default number of key shares and required threshold on init
pub const DEFAULT_SECRET_SHARES: u32 = 5;
pub const DEFAULT_SECRET_THRESHOLD: u32 = 3;

/// Default unseal polling period and attempt budget
pub const DEFAULT_UNSEAL_PERIOD: &str = "30s";
pub const DEFAULT_UNSEAL_ATTEMPTS: u32 = 4;

/// Field manager name for server-side patches
pub const FIELD_MANAGER: &str = "vault-operator";
