//! Transaction contract.
//!
//! # Data Flow
//! ```text
//! Producer builds a Transaction (e.g. http.rs)
//!     → high / low priority channel
//!     → Worker calls execute(cancel, client)
//!         Ok  → DeliveryObserver::on_successfully_sent(unit_count)
//!         Err → breaker close + requeue
//! ```
//!
//! # Design Decisions
//! - Transactions are shared (`Arc`) so the worker can requeue one while
//!   its execution runs on a separate task
//! - Cancellation is cooperative: `execute` watches the token and returns
//! - `execute` borrows the client; it must not keep a clone after returning

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::net::HttpClient;
use crate::observability::metrics;

pub mod http;

pub use http::HttpTransaction;

/// One unit of outbound work.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Endpoint identifier; keys the circuit breaker.
    fn target(&self) -> &str;

    /// Number of units accounted for on success.
    fn unit_count(&self) -> u64;

    /// Run the transaction. Must return promptly once `cancel` fires and
    /// leave no shared state half-updated.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        client: &HttpClient,
    ) -> Result<(), TransactionError>;
}

/// Handle passed through the channels.
pub type SharedTransaction = Arc<dyn Transaction>;

/// Errors a transaction execution can report.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("request to {target} failed: {source}")]
    Request {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{target} rejected the transaction with status {status}")]
    Rejected { target: String, status: u16 },

    #[error("transaction cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Callback invoked once per successfully executed transaction.
pub trait DeliveryObserver: Send + Sync {
    fn on_successfully_sent(&self, unit_count: u64);
}

/// Observer that only feeds the metrics recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl DeliveryObserver for MetricsObserver {
    fn on_successfully_sent(&self, unit_count: u64) {
        metrics::record_units_sent(unit_count);
    }
}
