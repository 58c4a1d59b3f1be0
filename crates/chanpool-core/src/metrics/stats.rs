//! Pool-wide counters and windowed gauges.
//!
//! Counters only ever grow. Windowed values (min/max since the last report)
//! are reset by [`PoolStats::report`]: gauges that track a live level restart
//! from the current level, gauges that track events restart from zero.

use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Counters of one channel, sampled by the pool when a report is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSample {
    pub active_streams: usize,
    pub affinity: usize,
    /// Ok calls completed since the previous report.
    pub ok_calls: u64,
    /// Failed calls completed since the previous report.
    pub err_calls: u64,
}

/// Point-in-time view of every pool metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetricsSnapshot {
    pub num_channels: usize,
    pub max_allowed_channels: usize,
    pub min_ready_channels: usize,
    pub max_ready_channels: usize,
    pub num_channel_connect: u64,
    pub num_channel_disconnect: u64,
    pub min_readiness_time_us: u64,
    pub avg_readiness_time_us: u64,
    pub max_readiness_time_us: u64,
    pub min_active_streams: usize,
    pub max_active_streams: usize,
    pub min_total_active_streams: usize,
    pub max_total_active_streams: usize,
    pub min_affinity: usize,
    pub max_affinity: usize,
    pub num_affinity: usize,
    pub min_ok_calls: u64,
    pub max_ok_calls: u64,
    pub min_err_calls: u64,
    pub max_err_calls: u64,
    pub total_ok_calls: u64,
    pub total_err_calls: u64,
    pub fallbacks_succeeded: u64,
    pub fallbacks_failed: u64,
    pub unresponsive_detections: u64,
    pub min_unresponsive_ms: u64,
    pub max_unresponsive_ms: u64,
    pub min_unresponsive_drops: u64,
    pub max_unresponsive_drops: u64,
}

#[derive(Debug, Default)]
struct ReadinessWindow {
    min_us: u64,
    max_us: u64,
    total_us: u64,
    occurrences: u64,
}

#[derive(Debug, Default)]
struct UnresponsiveWindow {
    min_ms: u64,
    max_ms: u64,
    min_drops: u64,
    max_drops: u64,
}

/// Shared statistics for one pool. Updated by channel handles and monitors,
/// drained by the metrics logger.
#[derive(Debug, Default)]
pub struct PoolStats {
    ready_channels: AtomicUsize,
    min_ready_channels: AtomicUsize,
    max_ready_channels: AtomicUsize,
    connects: AtomicU64,
    disconnects: AtomicU64,
    readiness: Mutex<ReadinessWindow>,

    total_active_streams: AtomicUsize,
    min_active_streams: AtomicUsize,
    max_active_streams: AtomicUsize,
    min_total_active_streams: AtomicUsize,
    max_total_active_streams: AtomicUsize,

    total_affinity: AtomicUsize,
    min_affinity: AtomicUsize,
    max_affinity: AtomicUsize,

    total_ok_calls: AtomicU64,
    total_err_calls: AtomicU64,

    fallbacks_succeeded: AtomicU64,
    fallbacks_failed: AtomicU64,

    unresponsive_detections: AtomicU64,
    unresponsive: Mutex<UnresponsiveWindow>,
}

fn saturating_decrement(counter: &AtomicUsize) -> usize {
    let previous = counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| Some(value.saturating_sub(1)))
        .unwrap_or_default();
    previous.saturating_sub(1)
}

impl PoolStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel became ready.
    pub fn channel_ready(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        let ready = self.ready_channels.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_ready_channels.fetch_max(ready, Ordering::Relaxed);
    }

    /// A channel left the ready state.
    pub fn channel_not_ready(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        let ready = saturating_decrement(&self.ready_channels);
        self.min_ready_channels.fetch_min(ready, Ordering::Relaxed);
    }

    #[must_use]
    pub fn ready_channels(&self) -> usize {
        self.ready_channels.load(Ordering::Acquire)
    }

    /// Records how long a channel took from `Connecting` to `Ready`.
    pub fn record_readiness_time(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let mut window = self.readiness.lock();
        if window.min_us == 0 || us < window.min_us {
            window.min_us = us;
        }
        window.max_us = window.max_us.max(us);
        window.total_us = window.total_us.saturating_add(us);
        window.occurrences += 1;
    }

    /// A stream started on a channel that now has `channel_streams` active.
    pub fn stream_started(&self, channel_streams: usize) {
        self.max_active_streams.fetch_max(channel_streams, Ordering::Relaxed);
        let total = self.total_active_streams.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_total_active_streams.fetch_max(total, Ordering::Relaxed);
    }

    /// A stream ended on a channel that now has `channel_streams` active.
    pub fn stream_ended(&self, channel_streams: usize, ok: bool) {
        self.min_active_streams.fetch_min(channel_streams, Ordering::Relaxed);
        let total = saturating_decrement(&self.total_active_streams);
        self.min_total_active_streams.fetch_min(total, Ordering::Relaxed);
        if ok {
            self.total_ok_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_err_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn total_active_streams(&self) -> usize {
        self.total_active_streams.load(Ordering::Acquire)
    }

    /// A key was bound to a channel that now has `channel_affinity` keys.
    pub fn affinity_added(&self, channel_affinity: usize) {
        self.max_affinity.fetch_max(channel_affinity, Ordering::Relaxed);
        self.total_affinity.fetch_add(1, Ordering::AcqRel);
    }

    /// A key was unbound from a channel that now has `channel_affinity` keys.
    pub fn affinity_removed(&self, channel_affinity: usize) {
        self.min_affinity.fetch_min(channel_affinity, Ordering::Relaxed);
        saturating_decrement(&self.total_affinity);
    }

    #[must_use]
    pub fn total_affinity(&self) -> usize {
        self.total_affinity.load(Ordering::Acquire)
    }

    pub fn fallback_succeeded(&self) {
        self.fallbacks_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_failed(&self) {
        self.fallbacks_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn fallbacks_succeeded(&self) -> u64 {
        self.fallbacks_succeeded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn fallbacks_failed(&self) -> u64 {
        self.fallbacks_failed.load(Ordering::Relaxed)
    }

    /// Records a fired unresponsiveness detection.
    pub fn record_unresponsive_detection(&self, elapsed: Duration, dropped: u32) {
        self.unresponsive_detections.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let drops = u64::from(dropped);
        let mut window = self.unresponsive.lock();
        if window.min_ms == 0 || ms < window.min_ms {
            window.min_ms = ms;
        }
        window.max_ms = window.max_ms.max(ms);
        if window.min_drops == 0 || drops < window.min_drops {
            window.min_drops = drops;
        }
        window.max_drops = window.max_drops.max(drops);
    }

    #[must_use]
    pub fn unresponsive_detections(&self) -> u64 {
        self.unresponsive_detections.load(Ordering::Relaxed)
    }

    /// Produces a snapshot and restarts every window.
    ///
    /// `channels` must already have had their per-report call counters drained.
    pub fn report(&self, channels: &[ChannelSample], max_allowed: usize) -> PoolMetricsSnapshot {
        let ready = self.ready_channels();
        let total_streams = self.total_active_streams();

        let streams = channels.iter().map(|c| c.active_streams);
        let affinity = channels.iter().map(|c| c.affinity);
        let ok_calls = channels.iter().map(|c| c.ok_calls);
        let err_calls = channels.iter().map(|c| c.err_calls);

        let readiness = std::mem::take(&mut *self.readiness.lock());
        let avg_readiness =
            if readiness.occurrences == 0 { 0 } else { readiness.total_us / readiness.occurrences };
        let unresponsive = std::mem::take(&mut *self.unresponsive.lock());

        PoolMetricsSnapshot {
            num_channels: channels.len(),
            max_allowed_channels: max_allowed,
            min_ready_channels: self.min_ready_channels.swap(ready, Ordering::Relaxed),
            max_ready_channels: self.max_ready_channels.swap(ready, Ordering::Relaxed),
            num_channel_connect: self.connects.load(Ordering::Relaxed),
            num_channel_disconnect: self.disconnects.load(Ordering::Relaxed),
            min_readiness_time_us: readiness.min_us,
            avg_readiness_time_us: avg_readiness,
            max_readiness_time_us: readiness.max_us,
            min_active_streams: self
                .min_active_streams
                .swap(streams.clone().min().unwrap_or(0), Ordering::Relaxed),
            max_active_streams: self
                .max_active_streams
                .swap(streams.max().unwrap_or(0), Ordering::Relaxed),
            min_total_active_streams: self
                .min_total_active_streams
                .swap(total_streams, Ordering::Relaxed),
            max_total_active_streams: self
                .max_total_active_streams
                .swap(total_streams, Ordering::Relaxed),
            min_affinity: self.min_affinity.swap(affinity.clone().min().unwrap_or(0), Ordering::Relaxed),
            max_affinity: self.max_affinity.swap(affinity.max().unwrap_or(0), Ordering::Relaxed),
            num_affinity: self.total_affinity(),
            min_ok_calls: ok_calls.clone().min().unwrap_or(0),
            max_ok_calls: ok_calls.max().unwrap_or(0),
            min_err_calls: err_calls.clone().min().unwrap_or(0),
            max_err_calls: err_calls.max().unwrap_or(0),
            total_ok_calls: self.total_ok_calls.load(Ordering::Relaxed),
            total_err_calls: self.total_err_calls.load(Ordering::Relaxed),
            fallbacks_succeeded: self.fallbacks_succeeded(),
            fallbacks_failed: self.fallbacks_failed(),
            unresponsive_detections: self.unresponsive_detections(),
            min_unresponsive_ms: unresponsive.min_ms,
            max_unresponsive_ms: unresponsive.max_ms,
            min_unresponsive_drops: unresponsive.min_drops,
            max_unresponsive_drops: unresponsive.max_drops,
        }
    }
}
