//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `otel`: OpenTelemetry tracing integration and subscriber setup

pub mod metrics;
pub mod otel;

pub use otel::{init_tracing, shutdown_otel, TracerProviderHandle};
