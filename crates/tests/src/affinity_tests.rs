//! Integration tests for affinity key binding.
//!
//! These tests verify that:
//! - A key maps to exactly one channel even when many threads bind it at once
//! - Per-channel bind counters always add up to the size of the table
//! - Keys extracted from bind/bound/unbind messages route calls to the same channel

use std::{sync::Arc, thread};

use chanpool_core::{
    config::MethodConfig,
    pool::{AffinityCommand, MethodAffinity},
    PoolError,
};
use serde_json::json;

use crate::support::{config, ready_pool};

const CREATE_SESSION: &str = "/google.spanner.v1.Spanner/CreateSession";
const EXECUTE_SQL: &str = "/google.spanner.v1.Spanner/ExecuteSql";
const DELETE_SESSION: &str = "/google.spanner.v1.Spanner/DeleteSession";

fn session_methods() -> Vec<MethodConfig> {
    let method = |name: &str, command, key: &str| MethodConfig {
        names: vec![name.to_string()],
        affinity: MethodAffinity { command, affinity_key: key.to_string() },
    };
    vec![
        method(CREATE_SESSION, AffinityCommand::Bind, "name"),
        method(EXECUTE_SQL, AffinityCommand::Bound, "session"),
        method(DELETE_SESSION, AffinityCommand::Unbind, "name"),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bind_of_one_key() {
    let test = ready_pool(config(8, 8, 100));
    let pool = &test.pool;
    let key = vec!["shared-key".to_string()];

    thread::scope(|scope| {
        for round in 0..16 {
            let pool = Arc::clone(pool);
            let key = key.clone();
            scope.spawn(move || {
                for i in 0..50 {
                    let handle = pool.channel((round + i) % 8).unwrap();
                    pool.bind(&handle, &key);
                }
            });
        }
    });

    assert_eq!(pool.affinity().len(), 1);
    let bound = pool.affinity().channel_id("shared-key").unwrap();
    let total: usize = pool.channels().iter().map(|handle| handle.affinity_count()).sum();
    assert_eq!(total, 1);
    assert_eq!(pool.channel(bound).unwrap().affinity_count(), 1);
    assert_eq!(pool.stats().total_affinity(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_of_keys() {
    let test = ready_pool(config(4, 0, 100));
    let pool = &test.pool;

    thread::scope(|scope| {
        for _ in 0..8 {
            let pool = Arc::clone(pool);
            scope.spawn(move || {
                for i in 0..100 {
                    let key = format!("key-{}", i % 20);
                    pool.select_channel(Some(key.as_str())).on_stream_start();
                }
            });
        }
    });

    assert_eq!(pool.affinity().len(), 20);
    assert_eq!(pool.stats().total_active_streams(), 800);
    let total: usize = pool.channels().iter().map(|handle| handle.affinity_count()).sum();
    assert_eq!(total, 20);
}

#[tokio::test]
async fn test_rebind_moves_key_and_counts() {
    let test = ready_pool(config(2, 2, 100));
    let pool = &test.pool;
    let first = pool.channel(0).unwrap();
    let second = pool.channel(1).unwrap();
    let keys = vec!["a".to_string(), "b".to_string()];

    pool.bind(&first, &keys);
    assert_eq!(first.affinity_count(), 2);

    pool.bind(&second, &keys[..1]);
    assert_eq!(first.affinity_count(), 1);
    assert_eq!(second.affinity_count(), 1);
    assert_eq!(pool.affinity().channel_id("a"), Some(1));
    assert_eq!(pool.affinity().channel_id("b"), Some(0));

    pool.unbind(&["a".to_string(), "missing".to_string()]);
    assert_eq!(second.affinity_count(), 0);
    assert_eq!(pool.affinity().len(), 1);
}

#[tokio::test]
async fn test_unknown_key_binds_to_selected_channel() {
    let test = ready_pool(config(3, 0, 100));
    let pool = &test.pool;

    let handle = pool.select_channel(Some("fresh"));
    assert_eq!(pool.affinity().channel_id("fresh"), Some(handle.id()));
    assert_eq!(handle.affinity_count(), 1);

    let again = pool.select_channel(Some("fresh"));
    assert_eq!(again.id(), handle.id());
    assert_eq!(handle.affinity_count(), 1);
}

#[tokio::test]
async fn test_session_flow_keeps_calls_on_one_channel() {
    let mut cfg = config(4, 0, 100);
    cfg.pool.use_round_robin_on_bind = true;
    cfg.methods = session_methods();
    let test = ready_pool(cfg);
    let pool = &test.pool;

    // Two sessions created round-robin land on different channels.
    let mut session_channels = Vec::new();
    for name in ["sessions/1", "sessions/2"] {
        let handle = pool.select_channel_for_bind();
        let response = json!({ "name": name });
        let keys = pool.affinity_keys(CREATE_SESSION, &response, false).unwrap().unwrap();
        pool.bind(&handle, &keys);
        session_channels.push(handle.id());
    }
    assert_ne!(session_channels[0], session_channels[1]);

    // Requests naming a session follow it.
    for (name, expected) in ["sessions/1", "sessions/2"].iter().zip(&session_channels) {
        let request = json!({ "session": name, "sql": "SELECT 1" });
        let keys = pool.affinity_keys(EXECUTE_SQL, &request, true).unwrap().unwrap();
        assert_eq!(keys, vec![(*name).to_string()]);
        assert_eq!(pool.select_channel(Some(keys[0].as_str())).id(), *expected);
    }

    // Bind methods carry no key in their request.
    assert_eq!(pool.affinity_keys(CREATE_SESSION, &json!({}), true).unwrap(), None);

    let delete = json!({ "name": "sessions/1" });
    let keys = pool.affinity_keys(DELETE_SESSION, &delete, true).unwrap().unwrap();
    pool.unbind(&keys);
    assert_eq!(pool.affinity().channel_id("sessions/1"), None);
    assert_eq!(pool.affinity().len(), 1);
}

#[tokio::test]
async fn test_bound_request_with_several_keys_is_rejected() {
    let mut cfg = config(2, 0, 100);
    cfg.methods = vec![MethodConfig {
        names: vec![EXECUTE_SQL.to_string()],
        affinity: MethodAffinity {
            command: AffinityCommand::Bound,
            affinity_key: "mutations.session".to_string(),
        },
    }];
    let test = ready_pool(cfg);

    let request = json!({ "mutations": [{ "session": "s1" }, { "session": "s2" }] });
    let result = test.pool.affinity_keys(EXECUTE_SQL, &request, true);
    assert!(matches!(result, Err(PoolError::DuplicateAffinityKey { count: 2, .. })));
}

#[tokio::test]
async fn test_unconfigured_method_has_no_keys() {
    let test = ready_pool(config(2, 0, 100));
    let keys = test.pool.affinity_keys("/svc/Other", &json!({ "name": "x" }), true).unwrap();
    assert_eq!(keys, None);
}
