//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init logging/metrics → Build pool → Start workers
//!
//! Shutdown (shutdown.rs):
//!     Signal or end of input → stop background helpers → stop workers
//!     (purging high priority) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Construction failures are fatal and happen before anything is spawned
//! - Worker stop is never forced: in-flight executions are cancelled and awaited

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
