//! Builder pattern for constructing a [`ChannelPool`].

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::{
    channel::ChannelBuilder,
    config::{AppConfig, MethodConfig, MetricsConfig, PoolConfig, ResiliencyConfig},
    pool::{errors::BuilderError, manager::ChannelPool},
};

/// Builder for a [`ChannelPool`].
///
/// # Examples
///
/// ```no_run
/// # use chanpool_core::{channel::simulated::SimulatedChannelBuilder, pool::ChannelPoolBuilder};
/// # use std::sync::Arc;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ChannelPoolBuilder::new()
///     .channel_builder(Arc::new(SimulatedChannelBuilder::default()))
///     .max_size(4)
///     .enable_fallback()
///     .build()?;
///
/// let channel = pool.select_channel(Some("session-1"));
/// channel.on_stream_start();
/// # Ok(())
/// # }
/// ```
pub struct ChannelPoolBuilder {
    channel_builder: Option<Arc<dyn ChannelBuilder>>,
    config: AppConfig,
    runtime: Option<Handle>,
}

impl ChannelPoolBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self { channel_builder: None, config: AppConfig::default(), runtime: None }
    }

    #[must_use]
    pub fn channel_builder(mut self, builder: Arc<dyn ChannelBuilder>) -> Self {
        self.channel_builder = Some(builder);
        self
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn pool_config(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    #[must_use]
    pub fn resiliency(mut self, resiliency: ResiliencyConfig) -> Self {
        self.config.resiliency = resiliency;
        self
    }

    #[must_use]
    pub fn methods(mut self, methods: Vec<MethodConfig>) -> Self {
        self.config.methods = methods;
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Sets the maximum pool size (default: 10).
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.pool.max_size = max_size;
        self
    }

    #[must_use]
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.config.pool.min_size = min_size;
        self
    }

    /// Sets the stream count at which the pool prefers growing (default: 100).
    #[must_use]
    pub fn streams_low_watermark(mut self, watermark: usize) -> Self {
        self.config.pool.concurrent_streams_low_watermark = watermark;
        self
    }

    #[must_use]
    pub fn enable_fallback(mut self) -> Self {
        self.config.resiliency.not_ready_fallback_enabled = true;
        self
    }

    /// Runtime for monitor tasks and callbacks (default: the current runtime).
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the pool, creating its minimum channels.
    ///
    /// Out-of-range bounds are clamped first.
    ///
    /// # Errors
    ///
    /// Returns `BuilderError::MissingChannelBuilder` if no channel builder was set.
    /// Returns `BuilderError::NoRuntime` when called outside a tokio runtime
    /// without an explicit [`runtime`](Self::runtime).
    pub fn build(self) -> Result<Arc<ChannelPool>, BuilderError> {
        let channel_builder = self.channel_builder.ok_or(BuilderError::MissingChannelBuilder)?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };

        let mut config = self.config;
        config.normalize();

        Ok(ChannelPool::new(channel_builder, &config, runtime))
    }
}

impl Default for ChannelPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
