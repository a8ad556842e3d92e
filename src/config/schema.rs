//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the forwarder.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the transaction forwarder.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Settings for the pooled network client owned by each worker.
    pub client: ClientConfig,

    /// Per-endpoint circuit breaker policy.
    pub breaker: BreakerConfig,

    /// Worker pool sizing and queue capacities.
    pub workers: WorkerConfig,

    /// Endpoints the binary forwards stdin payloads to.
    pub endpoints: Vec<EndpointConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Network client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Total time allowed for a single request/response, in seconds.
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// How long an idle pooled connection is kept, in seconds.
    pub pool_idle_timeout_secs: u64,

    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            connect_timeout_secs: 10,
            pool_idle_timeout_secs: 45,
            pool_max_idle_per_host: 8,
        }
    }
}

/// Shape of the cooldown curve applied each time a breaker opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffShape {
    /// Every open event waits `base_cooldown_ms`.
    Fixed,
    /// Cooldown doubles with each consecutive open event, capped at `max_cooldown_ms`.
    Exponential,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Number of consecutive failures before the breaker opens.
    pub failure_threshold: u32,

    /// Cooldown after the first open event, in milliseconds.
    pub base_cooldown_ms: u64,

    /// Upper bound on the cooldown, in milliseconds.
    pub max_cooldown_ms: u64,

    /// Cooldown growth across consecutive open events.
    pub backoff: BackoffShape,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_cooldown_ms: 2_000,
            max_cooldown_ms: 64_000,
            backoff: BackoffShape::Exponential,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of workers draining the shared queues.
    pub count: usize,

    /// Capacity of the high-priority input channel.
    pub high_priority_capacity: usize,

    /// Capacity of the low-priority input channel.
    pub low_priority_capacity: usize,

    /// Capacity of the requeue channel back to the producer side.
    pub requeue_capacity: usize,

    /// Interval between forced connection resets in seconds (0 disables).
    pub connection_reset_interval_secs: u64,

    /// How often requeued transactions are fed back, in seconds.
    pub retry_interval_secs: u64,

    /// Consecutive immediately-available high priority transactions a worker
    /// takes before it waits fairly on both queues.
    pub max_high_priority_streak: usize,
}

impl WorkerConfig {
    pub fn connection_reset_interval(&self) -> Option<Duration> {
        (self.connection_reset_interval_secs > 0)
            .then(|| Duration::from_secs(self.connection_reset_interval_secs))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 1,
            high_priority_capacity: 100,
            low_priority_capacity: 100,
            requeue_capacity: 100,
            connection_reset_interval_secs: 0,
            retry_interval_secs: 1,
            max_high_priority_streak: 8,
        }
    }
}

/// Queue a transaction is admitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
        }
    }
}

/// Remote endpoint definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Endpoint identifier, used as the breaker target.
    pub name: String,

    /// URL payloads are posted to.
    pub url: String,

    /// Queue this endpoint's transactions are admitted to.
    #[serde(default)]
    pub priority: Priority,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
