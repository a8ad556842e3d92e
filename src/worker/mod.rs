//! Worker subsystem.
//!
//! # Data Flow
//! ```text
//! producer → [high priority channel, low priority channel]
//!     → executor.rs (loop: take ready high work first, a bounded streak at a time, else fair)
//!     → EndpointBreakers::is_blocked?
//!         yes → requeue.rs (non-blocking offer, drop + log when full)
//!         no  → execute on its own task, raced against the stop signal
//!               failure → breaker close → requeue.rs
//!               success → DeliveryObserver + breaker recover
//!
//! pool.rs: owns the channels, the shared breakers, N workers and the
//! periodic connection-reset ticker.
//! ```
//!
//! # Design Decisions
//! - At most one execution in flight per worker
//! - Stop is cooperative: cancel the in-flight context, wait for it to return
//! - Connection resets are coalesced and applied between executions only
//! - Steady-state errors never escape the worker; only construction can fail

use thiserror::Error;

use crate::config::validation::ValidationError;
use crate::net::ClientError;

pub mod executor;
pub mod pool;
pub mod requeue;

pub use executor::{ResetHandle, Worker, WorkerChannels};
pub use pool::{SubmitError, WorkerPool};
pub use requeue::{DropReason, RequeueReason, RequeueSink};

/// Errors surfaced by workers and pools.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Not a processing error: the worker is being torn down.
    #[error("worker was requested to stop")]
    Stopping,

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    InvalidConfig(Vec<ValidationError>),
}
