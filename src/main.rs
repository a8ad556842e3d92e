//! Transaction forwarder (v1)
//!
//! Reads payloads from stdin, one per line, and forwards each to every
//! configured endpoint through a pool of transaction workers.
//!
//! # Architecture Overview
//!
//! ```text
//!   stdin line ──▶ HttpTransaction per endpoint ──▶ high / low priority channel
//!                                                          │
//!                                                          ▼
//!                                                  ┌───────────────┐
//!                                                  │  WorkerPool   │
//!                                                  │  N × Worker   │──▶ endpoint
//!                                                  └───────┬───────┘
//!                                      EndpointBreakers    │ failed / blocked
//!                                                          ▼
//!   low priority channel ◀── retry feeder (tick) ◀── requeue channel
//! ```
//!
//! On end of input or SIGINT/SIGTERM the pool stops, flushing queued
//! high priority transactions.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use txn_forwarder::config::{load_config, ForwarderConfig, Priority};
use txn_forwarder::lifecycle::{signals, Shutdown};
use txn_forwarder::observability::{logging, metrics};
use txn_forwarder::transaction::{HttpTransaction, MetricsObserver, SharedTransaction};
use txn_forwarder::worker::{SubmitError, WorkerPool};

#[derive(Parser, Debug)]
#[command(name = "txn-forwarder", version, about = "Forward stdin payloads to remote endpoints")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

struct Route {
    name: String,
    url: Url,
    priority: Priority,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ForwarderConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("txn-forwarder v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let routes = routes(&config)?;
    if routes.is_empty() {
        tracing::warn!("No endpoints configured, input will be discarded");
    }

    let mut pool = WorkerPool::new(&config, Arc::new(MetricsObserver))?;
    pool.start();

    let shutdown = Shutdown::new();
    let feeder = tokio::spawn(run_retry_feeder(
        pool.requeued(),
        pool.sender(Priority::Low),
        Duration::from_secs(config.workers.retry_interval_secs),
        shutdown.subscribe(),
    ));

    tokio::select! {
        lines = forward_stdin(&pool, &routes) => {
            tracing::info!(lines, "End of input");
        }
        _ = signals::shutdown_signal() => {}
    }

    shutdown.trigger();
    join(feeder).await;
    pool.stop(true).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn routes(config: &ForwarderConfig) -> Result<Vec<Route>, url::ParseError> {
    config
        .endpoints
        .iter()
        .map(|endpoint| {
            Ok(Route {
                name: endpoint.name.clone(),
                url: Url::parse(&endpoint.url)?,
                priority: endpoint.priority,
            })
        })
        .collect()
}

/// Submit one transaction per route for every stdin line. Returns the number
/// of lines read.
async fn forward_stdin(pool: &WorkerPool, routes: &[Route]) -> u64 {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut count = 0;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        count += 1;

        for route in routes {
            let txn: SharedTransaction = Arc::new(
                HttpTransaction::new(route.name.clone(), route.url.clone(), line.clone())
                    .with_content_type("application/json"),
            );
            match pool.submit(route.priority, txn) {
                Ok(()) => {}
                Err(e @ SubmitError::Full(_)) => {
                    tracing::warn!(endpoint = %route.name, error = %e, "Dropping input line");
                }
                Err(e @ SubmitError::Closed(_)) => {
                    tracing::error!(endpoint = %route.name, error = %e, "Pool is no longer accepting work");
                    return count;
                }
            }
        }
    }
    count
}

/// Move requeued transactions back to the low priority queue on every tick.
/// Whatever does not fit waits for the next tick.
async fn run_retry_feeder(
    requeued: Receiver<SharedTransaction>,
    low_priority: Sender<SharedTransaction>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut backlog: VecDeque<SharedTransaction> = VecDeque::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => break,
        }

        while let Ok(txn) = requeued.try_recv() {
            backlog.push_back(txn);
        }

        let mut fed = 0usize;
        while let Some(txn) = backlog.pop_front() {
            match low_priority.try_send(txn) {
                Ok(()) => fed += 1,
                Err(TrySendError::Full(txn)) => {
                    backlog.push_front(txn);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(pending = backlog.len() + 1, "Low priority queue closed");
                    return;
                }
            }
        }

        if fed > 0 || !backlog.is_empty() {
            tracing::debug!(fed, pending = backlog.len(), "Retried requeued transactions");
        }
    }

    if !backlog.is_empty() {
        tracing::warn!(pending = backlog.len(), "Discarding requeued transactions at shutdown");
    }
}

async fn join(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Background task failed");
    }
}
