//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Transaction picked by a worker:
//!     → circuit_breaker.rs (is the target blocked?)
//!         blocked  → requeue, no remote call
//!         allowed  → execute
//!     → outcome reported back:
//!         failure  → close(target)   (may open, cooldown from backoff.rs)
//!         success  → recover(target) (closes immediately)
//! ```
//!
//! # Design Decisions
//! - Breakers are keyed by target and shared by all workers of a pool
//! - The breaker never fails; it only answers yes/no and updates its own state
//! - Cooldown shape (fixed / exponential) and threshold come from config

pub mod backoff;
pub mod circuit_breaker;

pub use circuit_breaker::{CircuitState, EndpointBreakers};
