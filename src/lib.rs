//! Vault Operator Library
//!
//! Shared by the `vault-operator` controller, the `vault-unsealer` sidecar
//! and the `crdgen` generator.
//!
//! - [`controller`]: reconciliation of `Vault` resources into managed objects
//! - [`vault`]: Vault API client, unseal state machine and configurer
//! - [`keystore`]: storage backends for unseal keys and the root token
//! - [`pki`]: CA and leaf certificate generation

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod keystore;
pub mod observability;
pub mod pki;
pub mod runtime;
pub mod vault;
