//! Reusable connection-pooling client.
//!
//! # Responsibilities
//! - Build the pooled client from `ClientConfig` (timeouts, idle pool)
//! - Replace the client wholesale on a connection reset
//! - Number each replacement so resets can be observed
//!
//! The client is cheap to clone (the pool is reference counted). A worker hands
//! a clone to each execution; the clone is dropped when the execution returns,
//! so the worker's copy is the last owner whenever a reset is applied.

use thiserror::Error;

use crate::config::ClientConfig;

/// Error raised when the underlying client cannot be built.
#[derive(Debug, Error)]
#[error("failed to build network client: {0}")]
pub struct ClientError(#[from] reqwest::Error);

/// Pooled network client handed to transactions.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    generation: u64,
}

impl HttpClient {
    /// Build a fresh client (generation 0).
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::build(config, 0)
    }

    fn build(config: &ClientConfig, generation: u64) -> Result<Self, ClientError> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_idle_timeout(config.pool_idle_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()?;

        Ok(Self { inner, generation })
    }

    /// Build the replacement for this client. Nothing is shared with `self`,
    /// so every request sent through the new client opens new connections.
    pub fn renewed(&self, config: &ClientConfig) -> Result<Self, ClientError> {
        Self::build(config, self.generation + 1)
    }

    /// Release this client and the idle connections its pool holds.
    pub fn close_idle_connections(self) {
        tracing::debug!(generation = self.generation, "Closing idle connections");
        drop(self.inner);
    }

    /// The underlying request builder entry point.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// How many times this client's lineage has been replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
