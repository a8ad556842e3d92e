//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use txn_forwarder::config::{BackoffShape, BreakerConfig, ClientConfig};
use txn_forwarder::net::HttpClient;
use txn_forwarder::resilience::EndpointBreakers;
use txn_forwarder::transaction::{DeliveryObserver, SharedTransaction, Transaction, TransactionError};
use txn_forwarder::worker::{RequeueSink, Worker, WorkerChannels};

/// What a scripted transaction does when executed.
#[derive(Clone)]
pub enum Outcome {
    Succeed,
    Fail,
    Panic,
    /// Block until the worker cancels the context, then linger before returning.
    WaitForCancel(Duration),
    /// Block until the gate is released or the context is cancelled.
    Gate(CancellationToken),
}

/// Shared record of everything scripted transactions did.
#[derive(Default)]
pub struct Probe {
    events: Mutex<Vec<String>>,
    generations: Mutex<Vec<u64>>,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
    cancelled: AtomicUsize,
    returned: AtomicUsize,
}

impl Probe {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn generations(&self) -> Vec<u64> {
        self.generations.lock().unwrap().clone()
    }

    pub fn executed(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn returned(&self) -> usize {
        self.returned.load(Ordering::SeqCst)
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Transaction whose behaviour is fixed by the test.
pub struct ScriptedTransaction {
    label: String,
    target: String,
    units: u64,
    outcome: Outcome,
    delay: Duration,
    probe: Arc<Probe>,
    on_execute: Mutex<Option<Hook>>,
}

impl ScriptedTransaction {
    pub fn new(label: &str, target: &str, outcome: Outcome, probe: &Arc<Probe>) -> Self {
        Self {
            label: label.to_string(),
            target: target.to_string(),
            units: 1,
            outcome,
            delay: Duration::ZERO,
            probe: probe.clone(),
            on_execute: Mutex::new(None),
        }
    }

    pub fn with_units(mut self, units: u64) -> Self {
        self.units = units;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `hook` once, at the start of the first execution.
    pub fn on_execute(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.on_execute.lock().unwrap() = Some(Box::new(hook));
        self
    }

    pub fn shared(self) -> SharedTransaction {
        Arc::new(self)
    }
}

#[async_trait]
impl Transaction for ScriptedTransaction {
    fn target(&self) -> &str {
        &self.target
    }

    fn unit_count(&self) -> u64 {
        self.units
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        client: &HttpClient,
    ) -> Result<(), TransactionError> {
        let now = self.probe.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_inflight.fetch_max(now, Ordering::SeqCst);
        self.probe.events.lock().unwrap().push(self.label.clone());
        self.probe.generations.lock().unwrap().push(client.generation());

        let hook = self.on_execute.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = match &self.outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => Err(TransactionError::Other(format!("{} failed", self.label))),
            Outcome::Panic => {
                self.probe.inflight.fetch_sub(1, Ordering::SeqCst);
                panic!("{} panicked", self.label);
            }
            Outcome::WaitForCancel(linger) => {
                cancel.cancelled().await;
                self.probe.cancelled.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(*linger).await;
                Err(TransactionError::Cancelled)
            }
            Outcome::Gate(gate) => {
                tokio::select! {
                    _ = gate.cancelled() => Ok(()),
                    _ = cancel.cancelled() => {
                        self.probe.cancelled.fetch_add(1, Ordering::SeqCst);
                        Err(TransactionError::Cancelled)
                    }
                }
            }
        };

        self.probe.inflight.fetch_sub(1, Ordering::SeqCst);
        self.probe.returned.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Observer that counts success callbacks.
#[derive(Default)]
pub struct CountingObserver {
    calls: AtomicUsize,
    units: AtomicUsize,
}

impl CountingObserver {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn units(&self) -> usize {
        self.units.load(Ordering::SeqCst)
    }
}

impl DeliveryObserver for CountingObserver {
    fn on_successfully_sent(&self, unit_count: u64) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.units.fetch_add(unit_count as usize, Ordering::SeqCst);
    }
}

/// A single worker wired to test-owned channels.
pub struct Harness {
    pub worker: Worker,
    pub high: Sender<SharedTransaction>,
    pub low: Sender<SharedTransaction>,
    pub requeued: Receiver<SharedTransaction>,
    pub requeue_tx: Sender<SharedTransaction>,
    pub breakers: Arc<EndpointBreakers>,
    pub observer: Arc<CountingObserver>,
    pub probe: Arc<Probe>,
}

pub fn breaker_config(threshold: u32, cooldown: Duration) -> BreakerConfig {
    let cooldown_ms = cooldown.as_millis() as u64;
    BreakerConfig {
        failure_threshold: threshold,
        base_cooldown_ms: cooldown_ms,
        max_cooldown_ms: cooldown_ms,
        backoff: BackoffShape::Fixed,
    }
}

pub fn harness(breaker: BreakerConfig, requeue_capacity: usize) -> Harness {
    harness_sharing(Arc::new(EndpointBreakers::new(breaker)), requeue_capacity)
}

/// Like [`harness`], but on an existing breaker set so several workers can
/// share it.
pub fn harness_sharing(breakers: Arc<EndpointBreakers>, requeue_capacity: usize) -> Harness {
    let (high, high_rx) = async_channel::bounded(256);
    let (low, low_rx) = async_channel::bounded(256);
    let (requeue_tx, requeued) = async_channel::bounded(requeue_capacity);
    let observer = Arc::new(CountingObserver::default());

    let worker = Worker::new(
        0,
        &ClientConfig::default(),
        WorkerChannels {
            high_priority: high_rx,
            low_priority: low_rx,
            requeue: RequeueSink::new(requeue_tx.clone()),
        },
        breakers.clone(),
        observer.clone(),
    )
    .unwrap();

    Harness {
        worker,
        high,
        low,
        requeued,
        requeue_tx,
        breakers,
        observer,
        probe: Arc::new(Probe::default()),
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` receives the raw request head and returns status and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let Some(head) = read_request(&mut socket).await else {
                    return;
                };
                let (status, body) = f(head).await;
                let status_text = match status {
                    200 => "200 OK",
                    202 => "202 Accepted",
                    404 => "404 Not Found",
                    429 => "429 Too Many Requests",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Read a request head and its body. Returns the head.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(head)
}
