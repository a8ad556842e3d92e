//! Worker pool management.
//!
//! # Responsibilities
//! - Create the priority channels, the requeue channel and the shared breakers
//! - Start and stop every worker
//! - Fan connection-reset requests out to all workers, on demand or on a timer

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::validation::validate_config;
use crate::config::{ForwarderConfig, Priority};
use crate::lifecycle::Shutdown;
use crate::resilience::EndpointBreakers;
use crate::transaction::{DeliveryObserver, SharedTransaction};
use crate::worker::executor::{ResetHandle, Worker, WorkerChannels};
use crate::worker::requeue::RequeueSink;
use crate::worker::WorkerError;

/// Reasons a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("{} priority queue is full", .0.as_str())]
    Full(Priority),

    #[error("{} priority queue is closed", .0.as_str())]
    Closed(Priority),
}

/// A set of workers draining the same queues.
pub struct WorkerPool {
    workers: Vec<Worker>,
    high_priority: Sender<SharedTransaction>,
    low_priority: Sender<SharedTransaction>,
    requeued: Receiver<SharedTransaction>,
    breakers: Arc<EndpointBreakers>,
    reset_interval: Option<Duration>,
    shutdown: Shutdown,
    reset_ticker: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Build the pool. Invalid configuration or a client that cannot be
    /// created fails here, before anything runs.
    pub fn new(
        config: &ForwarderConfig,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Result<Self, WorkerError> {
        validate_config(config).map_err(WorkerError::InvalidConfig)?;

        let (high_tx, high_rx) = async_channel::bounded(config.workers.high_priority_capacity);
        let (low_tx, low_rx) = async_channel::bounded(config.workers.low_priority_capacity);
        let (requeue_tx, requeue_rx) = async_channel::bounded(config.workers.requeue_capacity);
        let breakers = Arc::new(EndpointBreakers::new(config.breaker.clone()));

        let channels = WorkerChannels {
            high_priority: high_rx,
            low_priority: low_rx,
            requeue: RequeueSink::new(requeue_tx),
        };
        let workers = (0..config.workers.count)
            .map(|id| {
                Worker::new(
                    id,
                    &config.client,
                    channels.clone(),
                    breakers.clone(),
                    observer.clone(),
                )
                .map(|worker| {
                    worker.with_high_priority_streak(config.workers.max_high_priority_streak)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            workers = workers.len(),
            failure_threshold = config.breaker.failure_threshold,
            client_timeout_secs = config.client.timeout_secs,
            "Worker pool created"
        );

        Ok(Self {
            workers,
            high_priority: high_tx,
            low_priority: low_tx,
            requeued: requeue_rx,
            breakers,
            reset_interval: config.workers.connection_reset_interval(),
            shutdown: Shutdown::new(),
            reset_ticker: None,
        })
    }

    pub fn start(&mut self) {
        for worker in &mut self.workers {
            worker.start();
        }

        if let Some(interval) = self.reset_interval {
            let handles = self.workers.iter().map(Worker::reset_handle).collect();
            let shutdown = self.shutdown.subscribe();
            self.reset_ticker = Some(tokio::spawn(run_reset_ticker(handles, interval, shutdown)));
        }
    }

    /// Stop every worker. See [`Worker::stop`] for `purge_high_priority`.
    pub async fn stop(&mut self, purge_high_priority: bool) {
        self.shutdown.trigger();
        if let Some(ticker) = self.reset_ticker.take() {
            let _ = ticker.await;
        }

        for worker in &mut self.workers {
            worker.stop(purge_high_priority).await;
        }
        tracing::info!(workers = self.workers.len(), "Worker pool stopped");
    }

    /// Offer a transaction without waiting for capacity.
    pub fn submit(&self, priority: Priority, txn: SharedTransaction) -> Result<(), SubmitError> {
        match self.sender(priority).try_send(txn) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SubmitError::Full(priority)),
            Err(TrySendError::Closed(_)) => Err(SubmitError::Closed(priority)),
        }
    }

    pub fn sender(&self, priority: Priority) -> Sender<SharedTransaction> {
        match priority {
            Priority::High => self.high_priority.clone(),
            Priority::Low => self.low_priority.clone(),
        }
    }

    /// Transactions handed back by the workers.
    pub fn requeued(&self) -> Receiver<SharedTransaction> {
        self.requeued.clone()
    }

    pub fn schedule_connection_reset(&self) {
        for worker in &self.workers {
            worker.schedule_connection_reset();
        }
    }

    pub fn breakers(&self) -> &Arc<EndpointBreakers> {
        &self.breakers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

async fn run_reset_ticker(
    handles: Vec<ResetHandle>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "Connection reset ticker starting");
    let mut ticker = time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for handle in &handles {
                    handle.schedule();
                }
                tracing::debug!(workers = handles.len(), "Scheduled connection reset");
            }
            _ = shutdown.recv() => break,
        }
    }
}
