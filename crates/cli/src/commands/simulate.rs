//! Drives a pool of simulated channels with concurrent keyed calls.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chanpool_core::{
    channel::simulated::SimulatedChannelBuilder, metrics::PoolMetricsSnapshot, ChannelPool,
    ChannelPoolBuilder, ConnectivityState, StatusCode,
};
use tokio::{sync::Semaphore, task::JoinSet};

use super::{
    config::load_config,
    utils::{print_info, print_success, print_warning, CliError, CliResult},
};

const CALL_LATENCY: Duration = Duration::from_millis(1);
const TERMINATION_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SimulateOptions {
    pub config_file: String,
    pub calls: usize,
    pub keys: usize,
    pub concurrency: usize,
    pub fail_channel: Option<usize>,
    pub unresponsive_channel: Option<usize>,
}

pub async fn run_simulation(options: SimulateOptions) -> CliResult<()> {
    print_info(&format!(
        "Simulating {} calls over {} affinity keys ({} in flight)...",
        options.calls, options.keys, options.concurrency
    ));

    let started = Instant::now();
    let snapshot = simulate(&options).await?;

    print_success(&format!("Simulation finished in {}ms", started.elapsed().as_millis()));
    if snapshot.fallbacks_failed > 0 {
        print_warning(&format!("{} calls found no fallback channel", snapshot.fallbacks_failed));
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}

/// Runs the simulation and returns the final metrics snapshot.
pub(crate) async fn simulate(options: &SimulateOptions) -> CliResult<PoolMetricsSnapshot> {
    let config = load_config(&options.config_file)?;
    let builder = Arc::new(
        SimulatedChannelBuilder::default()
            .initial_state(ConnectivityState::Ready)
            .auto_connect(true),
    );
    let pool = ChannelPoolBuilder::new()
        .channel_builder(builder.clone())
        .config(config)
        .build()?;

    let limiter = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut calls = JoinSet::new();

    for call in 0..options.calls {
        if call == options.calls / 2 {
            if let Some(id) = options.fail_channel {
                match builder.channel(id) {
                    Some(channel) => {
                        tracing::info!(channel_id = id, "breaking channel");
                        channel.set_state(ConnectivityState::TransientFailure);
                    }
                    None => print_warning(&format!("Channel {id} was never created, nothing to break")),
                }
            }
        }

        let permit = Arc::clone(&limiter)
            .acquire_owned()
            .await
            .map_err(|e| CliError::General(e.to_string()))?;
        let key = (options.keys > 0).then(|| format!("key-{}", call % options.keys));
        let pool = Arc::clone(&pool);
        let unresponsive = options.unresponsive_channel;

        calls.spawn(async move {
            simulated_call(&pool, key.as_deref(), unresponsive).await;
            drop(permit);
        });
    }

    while let Some(result) = calls.join_next().await {
        result.map_err(|e| CliError::General(e.to_string()))?;
    }

    let snapshot = pool.report_metrics();
    pool.shutdown();
    if !pool.await_termination(TERMINATION_TIMEOUT).await {
        print_warning("Pool did not terminate in time");
    }

    Ok(snapshot)
}

async fn simulated_call(pool: &ChannelPool, key: Option<&str>, unresponsive: Option<usize>) {
    let handle = pool.select_channel(key);
    let started = Instant::now();
    handle.on_stream_start();
    tokio::time::sleep(CALL_LATENCY).await;

    if unresponsive == Some(handle.id()) {
        handle.on_stream_end(started, StatusCode::DeadlineExceeded, true);
        return;
    }

    handle.on_message_received();
    handle.on_stream_end(started, StatusCode::Ok, false);
}
