//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ForwarderConfig (validated, immutable)
//!     → passed by reference to WorkerPool / Worker / EndpointBreakers
//! ```
//!
//! # Design Decisions
//! - No global settings: breaker thresholds, cooldowns and client timeouts
//!   travel in the config object handed to constructors
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BackoffShape, BreakerConfig, ClientConfig, EndpointConfig, ForwarderConfig, LogFormat,
    ObservabilityConfig, Priority, WorkerConfig,
};
