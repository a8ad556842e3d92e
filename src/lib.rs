//! Transaction forwarder library.
//!
//! Workers drain prioritised queues of outbound transactions, guard every
//! endpoint with a circuit breaker and hand failures back for retry.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod transaction;
pub mod worker;

pub use config::schema::ForwarderConfig;
pub use lifecycle::Shutdown;
pub use transaction::{SharedTransaction, Transaction, TransactionError};
pub use worker::{Worker, WorkerPool};
