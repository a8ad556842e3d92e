//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, transactions are executed
//! - Open: endpoint assumed down, transactions are requeued without a remote call
//! - Half-Open: cooldown elapsed, one probe is let through
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: is_blocked() called after the cooldown expired
//! Half-Open → Open: probe fails (cooldown escalates)
//! any → Closed: one success
//! ```
//!
//! # Design Decisions
//! - Per-target breaker (not global); one mutex per target, so workers sending
//!   to different endpoints never contend
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe per cooldown window in Half-Open
//! - Cooldown never shrinks while failures keep coming

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::{BackoffShape, BreakerConfig};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct EndpointCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    /// Open events since the last success; drives the cooldown curve.
    open_events: u32,
    /// End of the current cooldown (Open) or probe window (Half-Open).
    blocked_until: Instant,
}

impl EndpointCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            open_events: 0,
            blocked_until: Instant::now(),
        }
    }
}

/// The set of per-endpoint breakers shared by every worker.
#[derive(Debug)]
pub struct EndpointBreakers {
    config: BreakerConfig,
    circuits: DashMap<String, Arc<Mutex<EndpointCircuit>>>,
}

impl EndpointBreakers {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// Return true if a transaction to `target` must not be attempted now.
    ///
    /// An open breaker whose cooldown has expired moves to half-open and lets
    /// this caller through as the probe.
    pub fn is_blocked(&self, target: &str) -> bool {
        let Some(circuit) = self.lookup(target) else {
            return false;
        };
        let mut circuit = lock(&circuit);
        let now = Instant::now();

        match circuit.state {
            CircuitState::Closed => false,
            _ if now < circuit.blocked_until => true,
            CircuitState::Open | CircuitState::HalfOpen => {
                if circuit.state == CircuitState::Open {
                    tracing::info!(endpoint = %target, "Cooldown elapsed, probing endpoint");
                }
                circuit.state = CircuitState::HalfOpen;
                circuit.blocked_until = now + self.cooldown(circuit.open_events);
                false
            }
        }
    }

    /// Record a failed execution against `target`.
    pub fn close(&self, target: &str) {
        let circuit = self.circuit(target);
        let mut circuit = lock(&circuit);
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);

        let should_open = match circuit.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => circuit.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if !should_open {
            return;
        }

        circuit.open_events = circuit.open_events.saturating_add(1);
        let cooldown = self.cooldown(circuit.open_events);
        circuit.state = CircuitState::Open;
        circuit.blocked_until = Instant::now() + cooldown;

        tracing::warn!(
            endpoint = %target,
            consecutive_failures = circuit.consecutive_failures,
            cooldown_ms = cooldown.as_millis() as u64,
            "Too many errors for endpoint, circuit opened"
        );
        metrics::record_breaker_open(target, true);
    }

    /// Record a successful execution: the breaker closes immediately.
    pub fn recover(&self, target: &str) {
        let Some(circuit) = self.lookup(target) else {
            return;
        };
        let mut circuit = lock(&circuit);
        let previous = circuit.state;

        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
        circuit.open_events = 0;

        if previous != CircuitState::Closed {
            tracing::info!(endpoint = %target, "Endpoint recovered, circuit closed");
            metrics::record_breaker_open(target, false);
        }
    }

    pub fn state(&self, target: &str) -> CircuitState {
        self.inspect(target, |c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn consecutive_failures(&self, target: &str) -> u32 {
        self.inspect(target, |c| c.consecutive_failures).unwrap_or(0)
    }

    fn inspect<T>(&self, target: &str, read: impl FnOnce(&EndpointCircuit) -> T) -> Option<T> {
        let circuit = self.lookup(target)?;
        let guard = lock(&circuit);
        let value = read(&guard);
        Some(value)
    }

    fn cooldown(&self, open_events: u32) -> Duration {
        match self.config.backoff {
            BackoffShape::Fixed => Duration::from_millis(self.config.base_cooldown_ms),
            BackoffShape::Exponential => calculate_backoff(
                open_events.max(1),
                self.config.base_cooldown_ms,
                self.config.max_cooldown_ms,
            ),
        }
    }

    // The map guard is released before the per-target mutex is taken.
    fn lookup(&self, target: &str) -> Option<Arc<Mutex<EndpointCircuit>>> {
        self.circuits.get(target).map(|entry| entry.value().clone())
    }

    fn circuit(&self, target: &str) -> Arc<Mutex<EndpointCircuit>> {
        if let Some(circuit) = self.lookup(target) {
            return circuit;
        }
        self.circuits
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(EndpointCircuit::new())))
            .value()
            .clone()
    }
}

fn lock(circuit: &Mutex<EndpointCircuit>) -> MutexGuard<'_, EndpointCircuit> {
    circuit.lock().unwrap_or_else(PoisonError::into_inner)
}
