//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. Every violation is reported, not just the first.

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::ForwarderConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("breaker.max_cooldown_ms ({max}) is below breaker.base_cooldown_ms ({base})")]
    CooldownRange { base: u64, max: u64 },

    #[error("endpoint #{index} has an empty name")]
    EmptyEndpointName { index: usize },

    #[error("endpoint name '{0}' is used more than once")]
    DuplicateEndpoint(String),

    #[error("endpoint '{name}' has an invalid url '{url}': {reason}")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ForwarderConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let non_zero = [
        ("client.timeout_secs", config.client.timeout_secs),
        ("breaker.failure_threshold", config.breaker.failure_threshold as u64),
        ("breaker.base_cooldown_ms", config.breaker.base_cooldown_ms),
        ("workers.count", config.workers.count as u64),
        ("workers.high_priority_capacity", config.workers.high_priority_capacity as u64),
        ("workers.low_priority_capacity", config.workers.low_priority_capacity as u64),
        ("workers.requeue_capacity", config.workers.requeue_capacity as u64),
        ("workers.retry_interval_secs", config.workers.retry_interval_secs),
        ("workers.max_high_priority_streak", config.workers.max_high_priority_streak as u64),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.breaker.max_cooldown_ms < config.breaker.base_cooldown_ms {
        errors.push(ValidationError::CooldownRange {
            base: config.breaker.base_cooldown_ms,
            max: config.breaker.max_cooldown_ms,
        });
    }

    let mut seen = HashSet::new();
    for (index, endpoint) in config.endpoints.iter().enumerate() {
        if endpoint.name.trim().is_empty() {
            errors.push(ValidationError::EmptyEndpointName { index });
        } else if !seen.insert(endpoint.name.as_str()) {
            errors.push(ValidationError::DuplicateEndpoint(endpoint.name.clone()));
        }

        let invalid = |reason: String| ValidationError::InvalidUrl {
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            reason,
        };
        match Url::parse(&endpoint.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(invalid(format!("unsupported scheme '{}'", url.scheme()))),
            Err(e) => errors.push(invalid(e.to_string())),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
