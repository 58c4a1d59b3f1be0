//! Integration tests for state-change notifications, shutdown and termination.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chanpool_core::{ConnectivityState, ManagedChannel};

use crate::support::{build_pool, config, ready_pool, wait_until};

fn flag() -> (Arc<AtomicBool>, impl FnOnce() + Send + 'static) {
    let fired = Arc::new(AtomicBool::new(false));
    let setter = Arc::clone(&fired);
    (fired, move || setter.store(true, Ordering::SeqCst))
}

#[tokio::test]
async fn test_callback_waits_for_transition() {
    let test = build_pool(config(2, 1, 100), ConnectivityState::Idle);
    let (fired, callback) = flag();

    test.pool.notify_when_state_changed(ConnectivityState::Idle, callback);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!fired.load(Ordering::SeqCst));

    test.set_state(0, ConnectivityState::Ready);
    assert!(wait_until(|| fired.load(Ordering::SeqCst)).await);
}

#[tokio::test]
async fn test_callback_runs_when_state_already_differs() {
    let test = ready_pool(config(2, 1, 100));
    let (fired, callback) = flag();

    test.pool.notify_when_state_changed(ConnectivityState::Idle, callback);
    assert!(wait_until(|| fired.load(Ordering::SeqCst)).await);
}

#[tokio::test]
async fn test_every_parked_callback_runs_once() {
    let test = build_pool(config(2, 1, 100), ConnectivityState::Idle);
    let hits = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let hits = Arc::clone(&hits);
        test.pool.notify_when_state_changed(ConnectivityState::Idle, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    test.set_state(0, ConnectivityState::Connecting);
    assert!(wait_until(|| hits.load(Ordering::SeqCst) == 5).await);

    test.set_state(0, ConnectivityState::Ready);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_callbacks_rejected_after_shutdown() {
    let test = ready_pool(config(2, 1, 100));
    test.pool.shutdown();

    let (fired, callback) = flag();
    test.pool.notify_when_state_changed(ConnectivityState::Idle, callback);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_shutdown_terminates_every_channel() {
    let test = ready_pool(config(3, 3, 100));
    let pool = &test.pool;
    assert!(!pool.is_shutdown());

    pool.shutdown();
    pool.shutdown();
    assert!(pool.is_shutdown());
    assert!(pool.await_termination(Duration::from_secs(1)).await);
    assert!(pool.is_terminated());

    for id in 0..3 {
        let channel = test.builder.channel(id).unwrap();
        assert!(channel.is_shutdown());
        assert!(!channel.was_shutdown_now());
    }
    assert_eq!(pool.state(false), ConnectivityState::Shutdown);
}

#[tokio::test]
async fn test_shutdown_now_drops_parked_callbacks() {
    let test = build_pool(config(2, 2, 100), ConnectivityState::Idle);
    let (fired, callback) = flag();
    test.pool.notify_when_state_changed(ConnectivityState::Idle, callback);

    test.pool.shutdown_now();
    assert!(test.pool.is_shutdown());
    assert!(test.pool.is_terminated());
    for id in 0..2 {
        assert!(test.builder.channel(id).unwrap().was_shutdown_now());
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_shutdown_now_after_shutdown_escalates() {
    let test = ready_pool(config(2, 2, 100));
    test.pool.shutdown();
    test.pool.shutdown_now();

    assert!(test.pool.await_termination(Duration::from_secs(1)).await);
    assert!(test.pool.is_terminated());
}

#[tokio::test]
async fn test_metrics_logger_stops_on_shutdown() {
    let mut cfg = config(2, 1, 100);
    cfg.metrics.log_interval_seconds = 3600;
    let test = ready_pool(cfg);

    assert!(!test.pool.is_terminated());
    test.pool.shutdown();
    assert!(test.pool.await_termination(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_await_termination_without_shutdown_times_out() {
    let test = ready_pool(config(2, 1, 100));
    assert!(!test.pool.await_termination(Duration::from_millis(20)).await);
    assert!(!test.pool.is_terminated());
}

#[tokio::test]
async fn test_empty_pool_terminates() {
    let test = ready_pool(config(2, 0, 100));
    test.pool.shutdown();
    assert!(test.pool.await_termination(Duration::from_millis(100)).await);
}
