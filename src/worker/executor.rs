//! Transaction worker.
//!
//! # Responsibilities
//! - Drain the high and low priority channels, one transaction at a time
//! - Consult the endpoint breakers before every remote call
//! - Requeue failed or blocked transactions, report successes
//! - Replace the network client when a connection reset is pending
//! - Stop cooperatively, optionally flushing queued high priority work
//!
//! # Scheduling
//! While a high priority transaction is ready right now it is taken first,
//! up to `max_high_priority_streak` in a row. Then the worker waits on
//! whichever of {high, low, stop} becomes ready first. When high and low are
//! both ready that choice is random, so a saturated high priority stream
//! cannot starve low priority work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, Priority, WorkerConfig};
use crate::net::HttpClient;
use crate::observability::metrics;
use crate::resilience::EndpointBreakers;
use crate::transaction::{DeliveryObserver, SharedTransaction};
use crate::worker::requeue::{RequeueReason, RequeueSink};
use crate::worker::WorkerError;

/// Channel handles a worker is built from.
#[derive(Clone)]
pub struct WorkerChannels {
    pub high_priority: Receiver<SharedTransaction>,
    pub low_priority: Receiver<SharedTransaction>,
    pub requeue: RequeueSink,
}

/// Coalescing connection-reset request flag.
///
/// Any number of requests made before the next execution collapse into one
/// client replacement.
#[derive(Debug, Clone, Default)]
pub struct ResetHandle(Arc<AtomicBool>);

impl ResetHandle {
    /// Request a reset. Returns immediately; a no-op if one is already pending.
    pub fn schedule(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            tracing::debug!("Connection reset scheduled");
        }
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

enum Lifecycle {
    Ready(Executor),
    Running(JoinHandle<Executor>),
    Stopped,
}

/// A single transaction worker.
pub struct Worker {
    id: usize,
    high_priority: Receiver<SharedTransaction>,
    low_priority: Receiver<SharedTransaction>,
    stop: CancellationToken,
    reset: ResetHandle,
    max_high_priority_streak: usize,
    lifecycle: Lifecycle,
}

impl Worker {
    /// Build a worker. Fails if the network client cannot be created;
    /// nothing is started in that case.
    pub fn new(
        id: usize,
        client_config: &ClientConfig,
        channels: WorkerChannels,
        breakers: Arc<EndpointBreakers>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Result<Self, WorkerError> {
        let client = HttpClient::new(client_config)?;
        let stop = CancellationToken::new();
        let reset = ResetHandle::default();

        let executor = Executor {
            id,
            client,
            client_config: client_config.clone(),
            requeue: channels.requeue,
            breakers,
            observer,
            reset: reset.clone(),
            stop: stop.clone(),
        };

        Ok(Self {
            id,
            high_priority: channels.high_priority,
            low_priority: channels.low_priority,
            stop,
            reset,
            max_high_priority_streak: WorkerConfig::default().max_high_priority_streak,
            lifecycle: Lifecycle::Ready(executor),
        })
    }

    /// Bound on consecutive high priority transactions taken without a fair
    /// wait in between. Values below 1 are treated as 1.
    pub fn with_high_priority_streak(mut self, streak: usize) -> Self {
        self.max_high_priority_streak = streak.max(1);
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Spawn the worker loop. Returns immediately.
    pub fn start(&mut self) {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Ready(executor) => {
                let high = self.high_priority.clone();
                let low = self.low_priority.clone();
                let streak = self.max_high_priority_streak;
                self.lifecycle = Lifecycle::Running(tokio::spawn(executor.run(high, low, streak)));
            }
            other => {
                tracing::warn!(worker_id = self.id, "Worker already started or stopped");
                self.lifecycle = other;
            }
        }
    }

    /// Stop the worker and wait until its loop has exited.
    ///
    /// With `purge_high_priority`, every high priority transaction that is
    /// immediately available is then executed once, outcome ignored.
    pub async fn stop(&mut self, purge_high_priority: bool) {
        self.stop.cancel();

        let mut executor = match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Ready(executor) => executor,
            Lifecycle::Running(handle) => match handle.await {
                Ok(executor) => executor,
                Err(e) => {
                    tracing::error!(worker_id = self.id, error = %e, "Worker loop terminated abnormally");
                    return;
                }
            },
            Lifecycle::Stopped => return,
        };

        if purge_high_priority {
            let flushed = executor.purge(&self.high_priority).await;
            tracing::debug!(worker_id = self.id, flushed, "Flushed high priority transactions");
        }

        executor.client.close_idle_connections();
        tracing::info!(worker_id = self.id, "Worker stopped");
    }

    /// Ask for new connections before the next transaction is sent.
    pub fn schedule_connection_reset(&self) {
        self.reset.schedule();
    }

    /// Handle other tasks can use to schedule resets on this worker.
    pub fn reset_handle(&self) -> ResetHandle {
        self.reset.clone()
    }
}

/// State owned by the worker loop task.
struct Executor {
    id: usize,
    client: HttpClient,
    client_config: ClientConfig,
    requeue: RequeueSink,
    breakers: Arc<EndpointBreakers>,
    observer: Arc<dyn DeliveryObserver>,
    reset: ResetHandle,
    stop: CancellationToken,
}

impl Executor {
    async fn run(
        mut self,
        high: Receiver<SharedTransaction>,
        low: Receiver<SharedTransaction>,
        max_high_priority_streak: usize,
    ) -> Self {
        tracing::info!(worker_id = self.id, "Worker started");
        let mut high_open = true;
        let mut low_open = true;
        let mut streak = 0;

        while !self.stop.is_cancelled() {
            if high_open && streak < max_high_priority_streak {
                match high.try_recv() {
                    Ok(txn) => {
                        if self.call_process(txn).await.is_err() {
                            break;
                        }
                        streak += 1;
                        continue;
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Closed) => high_open = false,
                }
            }
            streak = 0;

            if !high_open && !low_open {
                tracing::info!(worker_id = self.id, "Input channels closed");
                break;
            }

            let received = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                received = next_input(&high, &low, high_open, low_open) => received,
            };

            match received {
                Ok(txn) => {
                    if self.call_process(txn).await.is_err() {
                        break;
                    }
                }
                Err(Priority::High) => high_open = false,
                Err(Priority::Low) => low_open = false,
            }
        }

        tracing::debug!(worker_id = self.id, "Worker loop exited");
        self
    }

    /// Process one transaction, cancelling it if the worker is stopped.
    async fn call_process(&mut self, txn: SharedTransaction) -> Result<(), WorkerError> {
        if self.stop.is_cancelled() {
            self.requeue.offer(txn, RequeueReason::Stopping);
            return Err(WorkerError::Stopping);
        }

        self.apply_pending_reset();

        let target = txn.target().to_string();
        if self.breakers.is_blocked(&target) {
            tracing::info!(
                worker_id = self.id,
                endpoint = %target,
                "Too many errors for endpoint, retrying later"
            );
            self.requeue.offer(txn, RequeueReason::Blocked);
            return Ok(());
        }

        let context = self.stop.child_token();
        let mut execution = tokio::spawn({
            let txn = txn.clone();
            let client = self.client.clone();
            let context = context.clone();
            async move { txn.execute(&context, &client).await }
        });

        let outcome = tokio::select! {
            biased;
            outcome = &mut execution => outcome,
            _ = self.stop.cancelled() => {
                context.cancel();
                // Cancellation is cooperative: the execution still has to return.
                let _ = execution.await;
                return Err(self.stopped_in_flight(&target));
            }
        };
        context.cancel();

        // The context is a child of the stop signal, so an execution can
        // finish with an error caused by the stop before it is observed above.
        if outcome.as_ref().map_or(true, Result::is_err) && self.stop.is_cancelled() {
            return Err(self.stopped_in_flight(&target));
        }

        match outcome {
            Ok(Ok(())) => {
                self.observer.on_successfully_sent(txn.unit_count());
                self.breakers.recover(&target);
                metrics::record_success(&target);
            }
            Ok(Err(e)) => {
                self.breakers.close(&target);
                metrics::record_failure(&target);
                tracing::warn!(
                    worker_id = self.id,
                    endpoint = %target,
                    error = %e,
                    "Error while processing transaction"
                );
                self.requeue.offer(txn, RequeueReason::Failed);
            }
            Err(e) => {
                self.breakers.close(&target);
                metrics::record_failure(&target);
                tracing::error!(
                    worker_id = self.id,
                    endpoint = %target,
                    error = %e,
                    "Transaction execution aborted"
                );
                self.requeue.offer(txn, RequeueReason::Failed);
            }
        }
        Ok(())
    }

    fn stopped_in_flight(&self, target: &str) -> WorkerError {
        tracing::info!(
            worker_id = self.id,
            endpoint = %target,
            "Worker stopped while a transaction was in flight"
        );
        metrics::record_inflight_cancellation(self.id);
        WorkerError::Stopping
    }

    /// Execute every immediately available high priority transaction.
    /// Outcomes are ignored: no requeue, no breaker update.
    async fn purge(&mut self, high: &Receiver<SharedTransaction>) -> usize {
        let mut flushed = 0;
        while let Ok(txn) = high.try_recv() {
            tracing::debug!(
                worker_id = self.id,
                endpoint = %txn.target(),
                "Flushing one transaction before stopping worker"
            );
            self.apply_pending_reset();

            let context = CancellationToken::new();
            if let Err(e) = txn.execute(&context, &self.client).await {
                tracing::debug!(worker_id = self.id, error = %e, "Ignoring flushed transaction error");
            }
            flushed += 1;
        }
        flushed
    }

    /// Replace the client if a reset was requested. Only called between
    /// executions, so no request holds the old client.
    fn apply_pending_reset(&mut self) {
        if !self.reset.take() {
            return;
        }

        match self.client.renewed(&self.client_config) {
            Ok(client) => {
                let previous = std::mem::replace(&mut self.client, client);
                previous.close_idle_connections();
                tracing::info!(
                    worker_id = self.id,
                    generation = self.client.generation(),
                    "Resetting worker's connections"
                );
                metrics::record_connection_reset(self.id);
            }
            Err(e) => {
                tracing::error!(
                    worker_id = self.id,
                    error = %e,
                    "Failed to rebuild client, keeping existing connections"
                );
            }
        }
    }
}

/// Wait for the next transaction from whichever open input is ready first.
/// `Err` names an input that has closed.
async fn next_input(
    high: &Receiver<SharedTransaction>,
    low: &Receiver<SharedTransaction>,
    high_open: bool,
    low_open: bool,
) -> Result<SharedTransaction, Priority> {
    tokio::select! {
        txn = high.recv(), if high_open => txn.map_err(|_| Priority::High),
        txn = low.recv(), if low_open => txn.map_err(|_| Priority::Low),
    }
}
