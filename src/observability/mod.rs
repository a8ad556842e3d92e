//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Worker / breaker / requeue sink produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`worker_id`, `endpoint`, `units`) on every event
//! - Metrics are cheap (atomic increments); recording without an installed
//!   recorder is a no-op, which keeps tests quiet

pub mod logging;
pub mod metrics;
