//! Integration tests for pool-wide connectivity state.

use chanpool_core::{ConnectivityState, ManagedChannel};

use crate::support::{build_pool, config, wait_until};

use ConnectivityState::{Connecting, Idle, Ready, Shutdown, TransientFailure};

#[tokio::test]
async fn test_empty_pool_is_idle() {
    let test = build_pool(config(3, 0, 100), Idle);
    assert_eq!(test.pool.state(false), Idle);
    assert_eq!(test.pool.num_channels(), 0);
}

#[tokio::test]
async fn test_request_connection_creates_first_channel() {
    let test = build_pool(config(3, 0, 100), Idle);

    assert_eq!(test.pool.state(true), Idle);
    assert_eq!(test.pool.num_channels(), 1);
    assert!(test.builder.channel(0).unwrap().connect_requests() >= 1);

    // Asking again does not grow the pool.
    test.pool.state(true);
    assert_eq!(test.pool.num_channels(), 1);
}

#[tokio::test]
async fn test_aggregate_prefers_ready() {
    let test = build_pool(config(3, 3, 100), Idle);
    test.set_state(0, TransientFailure);
    test.set_state(1, Connecting);
    test.set_state(2, Ready);
    assert_eq!(test.pool.state(false), Ready);

    test.set_state(2, TransientFailure);
    assert_eq!(test.pool.state(false), Connecting);

    test.set_state(1, TransientFailure);
    assert_eq!(test.pool.state(false), TransientFailure);
}

#[tokio::test]
async fn test_aggregate_of_mixed_pool() {
    let test = build_pool(config(3, 3, 100), Idle);
    test.set_state(0, Ready);
    test.set_state(1, Connecting);
    assert_eq!(test.pool.state(false), Ready);

    test.set_state(0, Connecting);
    test.set_state(1, Idle);
    test.set_state(2, Shutdown);
    assert_eq!(test.pool.state(false), Connecting);
}

#[tokio::test]
async fn test_aggregate_of_idle_and_shutdown() {
    let test = build_pool(config(2, 2, 100), Idle);
    assert_eq!(test.pool.state(false), Idle);

    test.builder.channel(0).unwrap().shutdown();
    assert_eq!(test.pool.state(false), Idle);

    test.builder.channel(1).unwrap().shutdown();
    assert_eq!(test.pool.state(false), Shutdown);
}

#[tokio::test]
async fn test_ready_channels_tracked_by_monitor() {
    let test = build_pool(config(3, 3, 100), Idle);
    let stats = test.pool.stats();
    assert_eq!(stats.ready_channels(), 0);

    test.set_state(0, Ready);
    test.set_state(1, Ready);
    assert!(wait_until(|| stats.ready_channels() == 2).await);

    test.set_state(0, TransientFailure);
    assert!(wait_until(|| stats.ready_channels() == 1).await);

    let snapshot = test.pool.report_metrics();
    assert_eq!(snapshot.num_channels, 3);
    assert_eq!(snapshot.max_allowed_channels, 3);
    assert!(snapshot.num_channel_connect >= 2);
    assert!(snapshot.num_channel_disconnect >= 1);
}

#[tokio::test]
async fn test_authority_from_first_channel() {
    let test = build_pool(config(2, 0, 100), Idle);

    // An empty pool asks a throw-away channel and does not keep it.
    assert_eq!(test.pool.authority(), "simulated.local:443");
    assert_eq!(test.pool.num_channels(), 0);
    assert_eq!(test.builder.built(), 1);
    assert!(test.builder.channel(0).unwrap().was_shutdown_now());

    test.pool.select_channel(None);
    assert_eq!(test.pool.authority(), "simulated.local:443");
    assert_eq!(test.builder.built(), 2);
}
