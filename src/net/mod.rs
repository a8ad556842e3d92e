//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ClientConfig
//!     → client.rs (HttpClient: pooled connections, timeouts)
//!     → owned by one Worker, lent to one execution at a time
//!
//! Connection reset:
//!     Worker::schedule_connection_reset()
//!     → next execution starts with HttpClient::renewed()
//!     → old client's idle connections closed
//! ```
//!
//! # Design Decisions
//! - The client is replaced, never mutated
//! - Replacement only happens between executions
//! - Per-request timeouts belong to the client, not to the worker

pub mod client;

pub use client::{ClientError, HttpClient};
