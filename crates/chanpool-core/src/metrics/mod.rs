//! # Pool Metrics
//!
//! Two layers:
//!
//! - [`PoolStats`]: counters and windowed gauges updated on the hot path with
//!   atomics. Windows that must move together sit behind narrow mutexes.
//! - [`MetricsRecorder`]: forwards a [`PoolMetricsSnapshot`] to the `metrics`
//!   facade. Whatever exporter the application installs receives the values;
//!   without one every call is a no-op.
//!
//! [`MetricsLogger`] drains the stats periodically, logs them at debug level
//! and hands the snapshot to the recorder.

mod stats;

pub use stats::{ChannelSample, PoolMetricsSnapshot, PoolStats};

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use metrics::{counter, gauge};
use tokio::{sync::broadcast, time::interval};

use crate::pool::ChannelPool;

/// Publishes snapshots through the `metrics` facade.
///
/// Every series carries a `pool` label; per-outcome series add `result`.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    prefix: String,
    pool: Arc<str>,
}

impl MetricsRecorder {
    #[must_use]
    pub fn new(prefix: impl Into<String>, pool: Arc<str>) -> Self {
        Self { prefix: prefix.into(), pool }
    }

    #[must_use]
    pub fn metric_name(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    fn gauge(&self, name: &str, value: f64) {
        gauge!(self.metric_name(name), "pool" => self.pool.to_string()).set(value);
    }

    fn gauge_with_result(&self, name: &str, result: &'static str, value: f64) {
        gauge!(self.metric_name(name), "pool" => self.pool.to_string(), "result" => result)
            .set(value);
    }

    fn counter(&self, name: &str, value: u64) {
        counter!(self.metric_name(name), "pool" => self.pool.to_string()).absolute(value);
    }

    fn counter_with_result(&self, name: &str, result: &'static str, value: u64) {
        counter!(self.metric_name(name), "pool" => self.pool.to_string(), "result" => result)
            .absolute(value);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record(&self, snapshot: &PoolMetricsSnapshot) {
        self.gauge("max_channels", snapshot.num_channels as f64);
        self.gauge("max_allowed_channels", snapshot.max_allowed_channels as f64);
        self.gauge("min_ready_channels", snapshot.min_ready_channels as f64);
        self.gauge("max_ready_channels", snapshot.max_ready_channels as f64);
        self.counter("num_channel_connect", snapshot.num_channel_connect);
        self.counter("num_channel_disconnect", snapshot.num_channel_disconnect);
        self.gauge("min_channel_readiness_time_us", snapshot.min_readiness_time_us as f64);
        self.gauge("avg_channel_readiness_time_us", snapshot.avg_readiness_time_us as f64);
        self.gauge("max_channel_readiness_time_us", snapshot.max_readiness_time_us as f64);
        self.gauge("min_active_streams_per_channel", snapshot.min_active_streams as f64);
        self.gauge("max_active_streams_per_channel", snapshot.max_active_streams as f64);
        self.gauge("min_total_active_streams", snapshot.min_total_active_streams as f64);
        self.gauge("max_total_active_streams", snapshot.max_total_active_streams as f64);
        self.gauge("min_affinity_per_channel", snapshot.min_affinity as f64);
        self.gauge("max_affinity_per_channel", snapshot.max_affinity as f64);
        self.gauge("num_affinity", snapshot.num_affinity as f64);
        self.gauge_with_result("min_calls_per_channel", "ok", snapshot.min_ok_calls as f64);
        self.gauge_with_result("max_calls_per_channel", "ok", snapshot.max_ok_calls as f64);
        self.gauge_with_result("min_calls_per_channel", "err", snapshot.min_err_calls as f64);
        self.gauge_with_result("max_calls_per_channel", "err", snapshot.max_err_calls as f64);
        self.counter_with_result("num_calls_completed", "ok", snapshot.total_ok_calls);
        self.counter_with_result("num_calls_completed", "err", snapshot.total_err_calls);
        self.counter_with_result("num_fallbacks", "ok", snapshot.fallbacks_succeeded);
        self.counter_with_result("num_fallbacks", "fail", snapshot.fallbacks_failed);
        self.counter("num_unresponsive_detections", snapshot.unresponsive_detections);
        self.gauge("min_unresponsive_detection_time_ms", snapshot.min_unresponsive_ms as f64);
        self.gauge("max_unresponsive_detection_time_ms", snapshot.max_unresponsive_ms as f64);
        self.gauge("min_unresponsive_dropped_calls", snapshot.min_unresponsive_drops as f64);
        self.gauge("max_unresponsive_dropped_calls", snapshot.max_unresponsive_drops as f64);
    }
}

/// Periodic metrics log for one pool.
pub struct MetricsLogger {
    pool: Weak<ChannelPool>,
    interval: Duration,
}

impl MetricsLogger {
    #[must_use]
    pub fn new(pool: Weak<ChannelPool>, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Spawns the logging loop. It ends on the shutdown signal or once the
    /// pool is dropped.
    #[must_use]
    pub fn start_with_shutdown(
        self,
        runtime: &tokio::runtime::Handle,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        runtime.spawn(async move {
            let mut ticker = interval(self.interval);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(pool) = self.pool.upgrade() else {
                            break;
                        };
                        pool.log_metrics();
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("metrics logger shutting down");
                        break;
                    }
                }
            }
        })
    }
}
