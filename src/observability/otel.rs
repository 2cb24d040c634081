//! # OpenTelemetry Support
//!
//! Tracing setup shared by the operator and the unsealer binaries.
//!
//! When `DD_API_KEY` is present the Datadog exporter from
//! `datadog-opentelemetry` is initialized; otherwise a plain
//! `tracing-subscriber` fmt layer with an `EnvFilter` is installed.

use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

/// Tracer provider handle for graceful shutdown
#[derive(Debug)]
pub enum TracerProviderHandle {
    Datadog(opentelemetry_sdk::trace::SdkTracerProvider),
}

/// Install the global subscriber.
///
/// `service_name` is used as the Datadog service when `DD_SERVICE` is unset.
/// `default_filter` applies when `RUST_LOG` is unset.
pub fn init_tracing(service_name: &str, default_filter: &str) -> Result<Option<TracerProviderHandle>> {
    let handle = if std::env::var("DD_API_KEY").is_ok() {
        Some(init_datadog(service_name))
    } else {
        None
    };

    if handle.is_none() {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.into()),
            )
            .init();
    }

    info!(
        build.version = env!("CARGO_PKG_VERSION"),
        build.git_hash = env!("BUILD_GIT_HASH"),
        build.datetime = env!("BUILD_DATETIME"),
        "Starting {service_name}"
    );
    Ok(handle)
}

/// Initialize Datadog OpenTelemetry tracing
///
/// Only called when `DD_API_KEY` is present. `DD_VERSION` defaults to the
/// crate version plus git hash from build.rs.
fn init_datadog(service_name: &str) -> TracerProviderHandle {
    if std::env::var("DD_SERVICE").is_err() {
        std::env::set_var("DD_SERVICE", service_name);
    }
    if std::env::var("DD_VERSION").is_err() {
        let build_version = format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("BUILD_GIT_HASH"));
        std::env::set_var("DD_VERSION", build_version);
    }
    if std::env::var("DD_SITE").is_err() {
        std::env::set_var("DD_SITE", "datadoghq.com");
    }
    if std::env::var("DD_TRACE_AGENT_URL").is_err() {
        std::env::set_var("DD_TRACE_AGENT_URL", "http://localhost:8126");
    }

    let tracer_provider = datadog_opentelemetry::tracing().init();

    info!(
        "Datadog OpenTelemetry tracing initialized: service={}, version={}, agent={}",
        std::env::var("DD_SERVICE").unwrap_or_default(),
        std::env::var("DD_VERSION").unwrap_or_default(),
        std::env::var("DD_TRACE_AGENT_URL").unwrap_or_default()
    );

    TracerProviderHandle::Datadog(tracer_provider)
}

/// Flush pending spans and shut down the tracer provider.
pub fn shutdown_otel(tracer_provider: Option<TracerProviderHandle>) {
    if let Some(TracerProviderHandle::Datadog(provider)) = tracer_provider {
        info!("Shutting down Datadog tracer provider...");
        if let Err(e) = provider.shutdown_with_timeout(Duration::from_secs(5)) {
            warn!("Error shutting down Datadog tracer provider: {}", e);
        }
    }
}
