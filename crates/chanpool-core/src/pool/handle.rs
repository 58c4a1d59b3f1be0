use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use crate::{
    channel::ManagedChannel,
    metrics::{ChannelSample, PoolStats},
    pool::unresponsive::{UnresponsiveConfig, UnresponsiveDetector},
    types::{ChannelId, StatusCode},
};

/// One backend channel plus the live counters the pool routes on.
///
/// Handles are created when the pool grows and live as long as the pool. The
/// call layer reports stream lifecycle through [`on_stream_start`],
/// [`on_stream_end`] and [`on_message_received`].
///
/// [`on_stream_start`]: ChannelHandle::on_stream_start
/// [`on_stream_end`]: ChannelHandle::on_stream_end
/// [`on_message_received`]: ChannelHandle::on_message_received
pub struct ChannelHandle {
    id: ChannelId,
    pool_label: Arc<str>,
    channel: Arc<dyn ManagedChannel>,
    active_streams: AtomicUsize,
    affinity_count: AtomicUsize,
    ok_calls: AtomicU64,
    err_calls: AtomicU64,
    detector: Option<UnresponsiveDetector>,
    stats: Arc<PoolStats>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("active_streams", &self.active_streams())
            .field("affinity_count", &self.affinity_count())
            .finish_non_exhaustive()
    }
}

impl ChannelHandle {
    pub(crate) fn new(
        id: ChannelId,
        pool_label: Arc<str>,
        channel: Arc<dyn ManagedChannel>,
        unresponsive: Option<UnresponsiveConfig>,
        stats: Arc<PoolStats>,
    ) -> Self {
        Self {
            id,
            pool_label,
            channel,
            active_streams: AtomicUsize::new(0),
            affinity_count: AtomicUsize::new(0),
            ok_calls: AtomicU64::new(0),
            err_calls: AtomicU64::new(0),
            detector: unresponsive.map(UnresponsiveDetector::new),
            stats,
        }
    }

    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    #[must_use]
    pub fn channel(&self) -> &Arc<dyn ManagedChannel> {
        &self.channel
    }

    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn affinity_count(&self) -> usize {
        self.affinity_count.load(Ordering::Acquire)
    }

    /// Unresponsiveness detector, present only when detection is enabled.
    #[must_use]
    pub fn detector(&self) -> Option<&UnresponsiveDetector> {
        self.detector.as_ref()
    }

    /// A call started a stream on this channel.
    pub fn on_stream_start(&self) {
        let streams = self.active_streams.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.stream_started(streams);
    }

    /// A call on this channel completed.
    ///
    /// `started_at` is when the call began and `from_client_side` marks
    /// outcomes produced locally rather than by the backend.
    pub fn on_stream_end(&self, started_at: Instant, code: StatusCode, from_client_side: bool) {
        self.on_stream_end_at(started_at, code, from_client_side, Instant::now());
    }

    /// Same as [`on_stream_end`](Self::on_stream_end) with an explicit
    /// completion time.
    pub fn on_stream_end_at(
        &self,
        started_at: Instant,
        code: StatusCode,
        from_client_side: bool,
        now: Instant,
    ) {
        let streams = self
            .active_streams
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or_default()
            .saturating_sub(1);

        let ok = code.is_ok();
        if ok {
            self.ok_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.err_calls.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.stream_ended(streams, ok);

        let Some(detector) = &self.detector else {
            return;
        };
        if let Some(detection) = detector.on_call_completed(started_at, code, from_client_side, now) {
            tracing::debug!(
                pool = %self.pool_label,
                channel_id = self.id,
                unresponsive_ms = u64::try_from(detection.elapsed.as_millis()).unwrap_or(u64::MAX),
                dropped_calls = detection.dropped,
                "channel unresponsive, forcing idle"
            );
            self.stats.record_unresponsive_detection(detection.elapsed, detection.dropped);
            self.channel.enter_idle();
        }
    }

    /// A response message arrived on a call carried by this channel.
    pub fn on_message_received(&self) {
        if let Some(detector) = &self.detector {
            detector.on_message_received(Instant::now());
        }
    }

    pub(crate) fn affinity_incr(&self) {
        let count = self.affinity_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.affinity_added(count);
    }

    pub(crate) fn affinity_decr(&self) {
        let count = self.affinity_count.fetch_sub(1, Ordering::AcqRel) - 1;
        self.stats.affinity_removed(count);
    }

    /// Samples this channel for a metrics report, draining its call counters.
    pub(crate) fn take_sample(&self) -> ChannelSample {
        ChannelSample {
            active_streams: self.active_streams(),
            affinity: self.affinity_count(),
            ok_calls: self.ok_calls.swap(0, Ordering::AcqRel),
            err_calls: self.err_calls.swap(0, Ordering::AcqRel),
        }
    }
}
