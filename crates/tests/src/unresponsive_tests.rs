//! Integration tests for unresponsive channel detection.
//!
//! Detection needs both enough consecutive deadline-exceeded calls and enough
//! time without a response. Completion times are passed explicitly so the
//! tests do not have to wait out the stall period.

use std::time::{Duration, Instant};

use chanpool_core::{ConnectivityState, StatusCode};

use crate::support::{config, ready_pool, wait_until, TestPool};

const STALL: Duration = Duration::from_millis(500);

fn detecting_pool() -> TestPool {
    let mut cfg = config(2, 1, 100);
    cfg.resiliency.unresponsive_detection_enabled = true;
    cfg.resiliency.unresponsive_detection_ms = 500;
    cfg.resiliency.unresponsive_detection_dropped_count = 3;
    ready_pool(cfg)
}

#[tokio::test]
async fn test_forces_idle_after_threshold() {
    let test = detecting_pool();
    let handle = test.pool.channel(0).unwrap();
    let started = Instant::now();
    let late = started + STALL + Duration::from_millis(100);

    for _ in 0..2 {
        handle.on_stream_start();
        handle.on_stream_end_at(started, StatusCode::DeadlineExceeded, true, late);
    }
    assert_eq!(test.builder.channel(0).unwrap().idle_requests(), 0);

    handle.on_stream_start();
    handle.on_stream_end_at(started, StatusCode::DeadlineExceeded, true, late);

    let channel = test.builder.channel(0).unwrap();
    assert_eq!(channel.idle_requests(), 1);
    assert_eq!(channel.current_state(), ConnectivityState::Idle);
    assert_eq!(handle.detector().unwrap().deadline_exceeded_count(), 0);
    assert_eq!(test.pool.stats().unresponsive_detections(), 1);

    // Channel 0 is below the minimum size, so the pool asks it to reconnect.
    assert!(wait_until(|| channel.connect_requests() >= 1).await);

    let snapshot = test.pool.report_metrics();
    assert_eq!(snapshot.unresponsive_detections, 1);
    assert_eq!(snapshot.max_unresponsive_drops, 3);
    assert!(snapshot.max_unresponsive_ms >= 600);
    assert_eq!(snapshot.total_err_calls, 3);
}

#[tokio::test]
async fn test_response_resets_count() {
    let test = detecting_pool();
    let handle = test.pool.channel(0).unwrap();
    let started = Instant::now();

    for _ in 0..2 {
        handle.on_stream_start();
        handle.on_stream_end_at(started, StatusCode::DeadlineExceeded, true, started + STALL * 2);
    }
    assert_eq!(handle.detector().unwrap().deadline_exceeded_count(), 2);

    handle.on_message_received();
    assert_eq!(handle.detector().unwrap().deadline_exceeded_count(), 0);

    let restarted = Instant::now();
    handle.on_stream_start();
    handle.on_stream_end_at(restarted, StatusCode::DeadlineExceeded, true, restarted + STALL * 2);

    assert_eq!(handle.detector().unwrap().deadline_exceeded_count(), 1);
    assert_eq!(test.builder.channel(0).unwrap().idle_requests(), 0);
    assert_eq!(test.pool.stats().unresponsive_detections(), 0);
}

#[tokio::test]
async fn test_calls_started_before_last_response_are_ignored() {
    let test = detecting_pool();
    let handle = test.pool.channel(0).unwrap();
    let stale_start = Instant::now();

    tokio::time::sleep(Duration::from_millis(2)).await;
    handle.on_message_received();

    for _ in 0..5 {
        handle.on_stream_start();
        handle.on_stream_end_at(
            stale_start,
            StatusCode::DeadlineExceeded,
            true,
            Instant::now() + STALL * 2,
        );
    }

    assert_eq!(handle.detector().unwrap().deadline_exceeded_count(), 0);
    assert_eq!(test.builder.channel(0).unwrap().idle_requests(), 0);
}

#[tokio::test]
async fn test_waits_for_stall_duration() {
    let test = detecting_pool();
    let handle = test.pool.channel(0).unwrap();
    let started = Instant::now();

    for _ in 0..4 {
        handle.on_stream_start();
        handle.on_stream_end_at(
            started,
            StatusCode::DeadlineExceeded,
            true,
            started + Duration::from_millis(100),
        );
    }
    assert_eq!(test.builder.channel(0).unwrap().idle_requests(), 0);

    handle.on_stream_start();
    handle.on_stream_end_at(started, StatusCode::DeadlineExceeded, true, started + STALL * 2);

    assert_eq!(test.builder.channel(0).unwrap().idle_requests(), 1);
    let snapshot = test.pool.report_metrics();
    assert_eq!(snapshot.max_unresponsive_drops, 5);
}

#[tokio::test]
async fn test_server_error_resets_but_client_error_does_not() {
    let test = detecting_pool();
    let handle = test.pool.channel(0).unwrap();
    let detector = handle.detector().unwrap();
    let started = Instant::now();
    let late = started + STALL * 2;

    handle.on_stream_start();
    handle.on_stream_end_at(started, StatusCode::DeadlineExceeded, true, late);
    handle.on_stream_start();
    handle.on_stream_end_at(started, StatusCode::Cancelled, true, late);
    assert_eq!(detector.deadline_exceeded_count(), 1);

    handle.on_stream_start();
    handle.on_stream_end_at(started, StatusCode::Unavailable, false, late);
    assert_eq!(detector.deadline_exceeded_count(), 0);
}

#[tokio::test]
async fn test_detection_disabled_by_default() {
    let test = ready_pool(config(2, 1, 100));
    let handle = test.pool.channel(0).unwrap();
    assert!(handle.detector().is_none());

    let started = Instant::now();
    for _ in 0..10 {
        handle.on_stream_start();
        handle.on_stream_end_at(
            started,
            StatusCode::DeadlineExceeded,
            true,
            started + Duration::from_secs(60),
        );
    }
    assert_eq!(test.builder.channel(0).unwrap().idle_requests(), 0);
}
