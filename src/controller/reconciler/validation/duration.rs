//! # Duration Parsing
//!
//! Kubernetes-style duration strings: `30s`, `5m`, `8760h`, `1d`, and
//! compound forms such as `1m30s` or `500ms`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("duration string cannot be empty")]
    Empty,

    #[error("invalid duration format '{0}': {1}")]
    Format(String, String),

    #[error("duration '{0}' must be greater than 0")]
    Zero(String),

    #[error("duration '{0}' is out of range")]
    Overflow(String),
}

/// Parse a Kubernetes duration string into a [`Duration`].
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration, DurationError> {
    let trimmed = duration_str.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }

    let duration = humantime::parse_duration(&trimmed.to_lowercase()).map_err(|e| match e {
        humantime::DurationError::NumberOverflow => DurationError::Overflow(trimmed.to_string()),
        other => DurationError::Format(trimmed.to_string(), other.to_string()),
    })?;
    if duration.is_zero() {
        return Err(DurationError::Zero(trimmed.to_string()));
    }
    Ok(duration)
}
