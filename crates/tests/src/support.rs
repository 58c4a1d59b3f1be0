//! Pool Construction and Polling Helpers
//!
//! Monitors run as tokio tasks, so state transitions reach the pool
//! asynchronously. Tests poll with [`wait_until`] instead of sleeping for a
//! fixed time.

use std::{sync::Arc, time::Duration};

use chanpool_core::{
    channel::simulated::SimulatedChannelBuilder, config::AppConfig, ChannelPool,
    ChannelPoolBuilder, ConnectivityState,
};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const DEFAULT_WAIT: Duration = Duration::from_secs(2);

/// A pool together with the builder that created its channels.
pub struct TestPool {
    pub pool: Arc<ChannelPool>,
    pub builder: Arc<SimulatedChannelBuilder>,
}

impl TestPool {
    /// Moves channel `id` to `state`.
    ///
    /// # Panics
    ///
    /// Panics if the pool never created channel `id`.
    pub fn set_state(&self, id: usize, state: ConnectivityState) {
        self.builder.channel(id).expect("channel exists").set_state(state);
    }
}

/// Configuration with the periodic metrics log disabled.
#[must_use]
pub fn config(max_size: usize, min_size: usize, watermark: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.pool.max_size = max_size;
    config.pool.min_size = min_size;
    config.pool.concurrent_streams_low_watermark = watermark;
    config.metrics.log_interval_seconds = 0;
    config
}

/// Builds a pool whose channels start in `initial` and do not connect on their own.
///
/// # Panics
///
/// Panics when called outside a tokio runtime.
#[must_use]
pub fn build_pool(config: AppConfig, initial: ConnectivityState) -> TestPool {
    let builder = Arc::new(SimulatedChannelBuilder::default().initial_state(initial));
    let pool = ChannelPoolBuilder::new()
        .channel_builder(builder.clone())
        .config(config)
        .build()
        .expect("pool builds inside a runtime");
    TestPool { pool, builder }
}

/// Builds a pool of channels that are `Ready` from the start.
#[must_use]
pub fn ready_pool(config: AppConfig) -> TestPool {
    build_pool(config, ConnectivityState::Ready)
}

/// Polls `condition` until it holds or `DEFAULT_WAIT` passes.
pub async fn wait_until<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    wait_until_for(DEFAULT_WAIT, condition).await
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_until_for<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
