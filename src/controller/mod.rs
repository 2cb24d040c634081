//! # Controller
//!
//! Core controller modules for the Vault operator.
//!
//! - `backoff`: Fibonacci backoff for failed reconciliations
//! - `reconciler`: `Vault` reconciliation
//! - `server`: HTTP server for metrics and health checks
//!
//! `crdgen.rs` in this directory is the CRD generator binary.

pub mod backoff;
pub mod reconciler;
pub mod server;
