//! Scheduling behaviour of a single worker.

use std::time::Duration;

mod common;

use common::{breaker_config, harness, wait_until, Outcome, ScriptedTransaction};

fn default_breaker() -> txn_forwarder::config::BreakerConfig {
    breaker_config(3, Duration::from_secs(60))
}

#[tokio::test]
async fn test_high_priority_arriving_first_runs_before_low() {
    let mut h = harness(default_breaker(), 10);

    let h2 = ScriptedTransaction::new("H2", "intake", Outcome::Succeed, &h.probe).shared();
    let l = ScriptedTransaction::new("L", "intake", Outcome::Succeed, &h.probe).shared();
    let (high, low) = (h.high.clone(), h.low.clone());
    let h1 = ScriptedTransaction::new("H1", "intake", Outcome::Succeed, &h.probe)
        .on_execute(move || {
            high.try_send(h2).unwrap();
            low.try_send(l).unwrap();
        })
        .shared();

    h.worker.start();
    // Let the worker go idle so H1 is picked from the blocking wait.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.high.send(h1).await.unwrap();

    wait_until("three executions", || h.observer.calls() == 3).await;
    assert_eq!(h.probe.events(), vec!["H1", "H2", "L"]);

    h.worker.stop(false).await;
}

#[tokio::test]
async fn test_queued_high_priority_is_not_overtaken_by_low() {
    let mut h = harness(default_breaker(), 10);

    let queued: Vec<_> = ["H2", "H3", "H4"]
        .into_iter()
        .map(|label| ScriptedTransaction::new(label, "intake", Outcome::Succeed, &h.probe).shared())
        .collect();
    let l = ScriptedTransaction::new("L", "intake", Outcome::Succeed, &h.probe).shared();
    let (high, low) = (h.high.clone(), h.low.clone());
    let h1 = ScriptedTransaction::new("H1", "intake", Outcome::Succeed, &h.probe)
        .on_execute(move || {
            for txn in queued {
                high.try_send(txn).unwrap();
            }
            low.try_send(l).unwrap();
        })
        .shared();

    h.worker.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.high.send(h1).await.unwrap();

    wait_until("five executions", || h.observer.calls() == 5).await;
    assert_eq!(h.probe.events(), vec!["H1", "H2", "H3", "H4", "L"]);

    h.worker.stop(false).await;
}

fn first_low(events: &[String]) -> usize {
    events
        .iter()
        .position(|e| e.starts_with('L'))
        .expect("low priority never ran")
}

#[tokio::test]
async fn test_low_priority_is_not_starved() {
    let mut h = harness(default_breaker(), 10);

    for i in 0..200 {
        let txn = ScriptedTransaction::new(&format!("H{i}"), "intake", Outcome::Succeed, &h.probe);
        h.high.try_send(txn.shared()).unwrap();
    }
    for i in 0..5 {
        let txn = ScriptedTransaction::new(&format!("L{i}"), "intake", Outcome::Succeed, &h.probe);
        h.low.try_send(txn.shared()).unwrap();
    }

    h.worker.start();
    wait_until("all executions", || h.observer.calls() == 205).await;

    // A fair wait happens at least every ninth execution.
    let position = first_low(&h.probe.events());
    assert!(position < 120, "first low priority item ran at position {position}");

    h.worker.stop(false).await;
}

#[tokio::test]
async fn test_high_priority_streak_is_bounded() {
    let mut h = harness(default_breaker(), 10);
    h.worker = h.worker.with_high_priority_streak(1);

    for i in 0..50 {
        let txn = ScriptedTransaction::new(&format!("H{i}"), "intake", Outcome::Succeed, &h.probe);
        h.high.try_send(txn.shared()).unwrap();
    }
    for i in 0..5 {
        let txn = ScriptedTransaction::new(&format!("L{i}"), "intake", Outcome::Succeed, &h.probe);
        h.low.try_send(txn.shared()).unwrap();
    }

    h.worker.start();
    wait_until("all executions", || h.observer.calls() == 55).await;

    let position = first_low(&h.probe.events());
    assert!(position < 30, "first low priority item ran at position {position}");

    h.worker.stop(false).await;
}

#[tokio::test]
async fn test_at_most_one_execution_in_flight() {
    let mut h = harness(default_breaker(), 10);

    for i in 0..10 {
        let high = ScriptedTransaction::new(&format!("H{i}"), "intake", Outcome::Succeed, &h.probe)
            .with_delay(Duration::from_millis(5));
        let low = ScriptedTransaction::new(&format!("L{i}"), "archive", Outcome::Succeed, &h.probe)
            .with_delay(Duration::from_millis(5));
        h.high.try_send(high.shared()).unwrap();
        h.low.try_send(low.shared()).unwrap();
    }

    h.worker.start();
    wait_until("all executions", || h.observer.calls() == 20).await;

    assert_eq!(h.probe.max_inflight(), 1);
    assert_eq!(h.observer.units(), 20);

    h.worker.stop(false).await;
}

#[tokio::test]
async fn test_success_callback_reports_unit_count() {
    let mut h = harness(default_breaker(), 10);

    let txn = ScriptedTransaction::new("A", "intake", Outcome::Succeed, &h.probe).with_units(42);
    h.low.try_send(txn.shared()).unwrap();
    let failing = ScriptedTransaction::new("B", "intake", Outcome::Fail, &h.probe).with_units(7);
    h.low.try_send(failing.shared()).unwrap();

    h.worker.start();
    wait_until("failed transaction requeued", || h.requeued.len() == 1).await;

    assert_eq!(h.observer.calls(), 1);
    assert_eq!(h.observer.units(), 42);

    h.worker.stop(false).await;
}

#[tokio::test]
async fn test_reset_requests_coalesce() {
    let mut h = harness(default_breaker(), 10);

    h.worker.schedule_connection_reset();
    h.worker.reset_handle().schedule();

    for label in ["A", "B"] {
        let txn = ScriptedTransaction::new(label, "intake", Outcome::Succeed, &h.probe);
        h.low.try_send(txn.shared()).unwrap();
    }

    h.worker.start();
    wait_until("two executions", || h.observer.calls() == 2).await;
    assert_eq!(h.probe.generations(), vec![1, 1]);

    h.worker.schedule_connection_reset();
    let txn = ScriptedTransaction::new("C", "intake", Outcome::Succeed, &h.probe);
    h.low.send(txn.shared()).await.unwrap();
    wait_until("third execution", || h.observer.calls() == 3).await;
    assert_eq!(h.probe.generations(), vec![1, 1, 2]);

    h.worker.stop(false).await;
}

#[tokio::test]
async fn test_reset_waits_for_in_flight_execution() {
    let mut h = harness(default_breaker(), 10);
    let gate = tokio_util::sync::CancellationToken::new();

    let gated = ScriptedTransaction::new("G", "intake", Outcome::Gate(gate.clone()), &h.probe);
    h.low.try_send(gated.shared()).unwrap();
    h.worker.start();
    wait_until("gated execution", || h.probe.inflight() == 1).await;

    h.worker.schedule_connection_reset();
    let next = ScriptedTransaction::new("N", "intake", Outcome::Succeed, &h.probe);
    h.low.try_send(next.shared()).unwrap();
    gate.cancel();

    wait_until("both executions", || h.observer.calls() == 2).await;
    assert_eq!(h.probe.generations(), vec![0, 1]);

    h.worker.stop(false).await;
}

#[tokio::test]
async fn test_loop_exits_when_inputs_close() {
    let h = harness(default_breaker(), 10);
    let common::Harness { mut worker, high, low, probe, observer, .. } = h;

    let txn = ScriptedTransaction::new("A", "intake", Outcome::Succeed, &probe);
    low.try_send(txn.shared()).unwrap();
    drop(high);
    drop(low);

    worker.start();
    wait_until("queued execution", || observer.calls() == 1).await;

    tokio::time::timeout(Duration::from_secs(1), worker.stop(false))
        .await
        .expect("worker did not exit after inputs closed");
}
