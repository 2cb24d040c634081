//! # Configuration
//!
//! Operator-level settings are read once from the environment at startup and
//! passed into the reconciler. The unsealer builds its policy from CLI args
//! (see [`crate::vault::unseal::UnsealPolicy`]).

pub mod controller;

pub use controller::ControllerConfig;
