//! # Runtime
//!
//! Operator process wiring.
//!
//! - `initialization`: startup of tracing, metrics, probes and the client
//! - `error_policy`: retry decisions for failed passes and watch errors
//! - `watch_loop`: the kube-runtime controller loop

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
