//! Integration tests for pool growth and channel selection.

use std::{sync::Arc, thread};

use chanpool_core::ConnectivityState;

use crate::support::{build_pool, config, ready_pool};

#[tokio::test]
async fn test_grows_when_every_channel_reaches_watermark() {
    let test = ready_pool(config(3, 0, 2));
    let pool = &test.pool;
    assert_eq!(pool.num_channels(), 0);

    let mut picked = Vec::new();
    for _ in 0..6 {
        let handle = pool.select_channel(None);
        handle.on_stream_start();
        picked.push(handle.id());
    }

    assert_eq!(picked, vec![0, 0, 1, 1, 2, 2]);
    assert_eq!(pool.num_channels(), 3);

    // At the maximum, the least busy channel takes the overflow.
    let handle = pool.select_channel(None);
    assert_eq!(handle.id(), 0);
    assert_eq!(pool.num_channels(), 3);
}

#[tokio::test]
async fn test_reuses_channels_below_watermark() {
    let test = ready_pool(config(3, 0, 2));
    let pool = &test.pool;

    for _ in 0..10 {
        let handle = pool.select_channel(None);
        handle.on_stream_start();
        handle.on_stream_end(std::time::Instant::now(), chanpool_core::StatusCode::Ok, false);
    }
    assert_eq!(pool.num_channels(), 1);
}

#[tokio::test]
async fn test_min_size_channels_created_eagerly() {
    let test = build_pool(config(5, 2, 100), ConnectivityState::Idle);
    assert_eq!(test.pool.num_channels(), 2);
    assert_eq!(test.builder.built(), 2);
    // Channels below the minimum are asked to connect.
    assert!(test.builder.channel(0).unwrap().connect_requests() >= 1);
    assert!(test.builder.channel(1).unwrap().connect_requests() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_selection_never_exceeds_max() {
    let test = ready_pool(config(4, 0, 1));
    let pool = &test.pool;

    thread::scope(|scope| {
        for _ in 0..8 {
            let pool = Arc::clone(pool);
            scope.spawn(move || {
                for _ in 0..25 {
                    pool.select_channel(None).on_stream_start();
                }
            });
        }
    });

    assert_eq!(pool.num_channels(), 4);
    assert_eq!(test.builder.built(), 4);
    let ids: Vec<usize> = pool.channels().iter().map(|handle| handle.id()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    assert_eq!(pool.stats().total_active_streams(), 200);
}

#[tokio::test]
async fn test_round_robin_bind_fills_then_cycles() {
    let mut cfg = config(3, 0, 100);
    cfg.pool.use_round_robin_on_bind = true;
    let test = ready_pool(cfg);
    let pool = &test.pool;

    let picked: Vec<usize> = (0..7).map(|_| pool.select_channel_for_bind().id()).collect();
    assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(pool.num_channels(), 3);
}

#[tokio::test]
async fn test_active_stream_bounds() {
    let test = ready_pool(config(2, 2, 100));
    let pool = &test.pool;

    let busy = pool.channel(1).unwrap();
    busy.on_stream_start();
    busy.on_stream_start();
    assert_eq!(pool.min_active_streams(), 0);
    assert_eq!(pool.max_active_streams(), 2);

    // Completions never drive a counter below zero.
    let idle = pool.channel(0).unwrap();
    idle.on_stream_end(std::time::Instant::now(), chanpool_core::StatusCode::Cancelled, true);
    assert_eq!(idle.active_streams(), 0);
}
