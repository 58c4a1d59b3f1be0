use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle};

use crate::{
    channel::ChannelBuilder,
    config::{AppConfig, MAX_STREAMS_PER_CHANNEL},
    metrics::{MetricsLogger, MetricsRecorder, PoolMetricsSnapshot, PoolStats},
    pool::{
        affinity::AffinityTable,
        errors::PoolError,
        fallback::FallbackTable,
        handle::ChannelHandle,
        keys::{AffinityCommand, AffinityKeySource, MethodAffinity},
        monitor::{self, ConnectivityMonitor, FallbackAction, StateTransition},
        notifier::StateNotifier,
        unresponsive::UnresponsiveConfig,
    },
    types::{ChannelId, ConnectivityState},
};

static POOL_INDEX: AtomicUsize = AtomicUsize::new(0);

/// State serialized by the grow lock: channel creation and the bind cursor.
#[derive(Debug, Default)]
struct GrowState {
    bind_cursor: Option<usize>,
}

/// A pool of channels presented as one logical channel.
///
/// Selection reads a lock-free snapshot of the append-only channel list and
/// the channels' atomic counters, so concurrent callers may occasionally see
/// slightly stale load figures. Growth and the round-robin cursor are
/// serialized by a single mutex.
pub struct ChannelPool {
    label: Arc<str>,
    weak_self: Weak<ChannelPool>,
    builder: Arc<dyn ChannelBuilder>,
    channels: ArcSwap<Vec<Arc<ChannelHandle>>>,
    grow: Mutex<GrowState>,

    max_size: usize,
    min_size: usize,
    streams_low_watermark: usize,
    round_robin_on_bind: bool,
    fallback_enabled: bool,
    unresponsive: Option<UnresponsiveConfig>,
    method_affinity: HashMap<String, MethodAffinity>,

    affinity: AffinityTable,
    fallback: FallbackTable,
    stats: Arc<PoolStats>,
    recorder: Option<MetricsRecorder>,
    notifier: StateNotifier,

    runtime: Handle,
    monitors: Mutex<Vec<JoinHandle<()>>>,
    metrics_logger: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("label", &self.label)
            .field("num_channels", &self.num_channels())
            .field("max_size", &self.max_size)
            .field("min_size", &self.min_size)
            .finish_non_exhaustive()
    }
}

impl ChannelPool {
    /// Creates the pool, its minimum channels and its metrics logger.
    ///
    /// `config` must already be normalized.
    pub(crate) fn new(
        builder: Arc<dyn ChannelBuilder>,
        config: &AppConfig,
        runtime: Handle,
    ) -> Arc<Self> {
        let label: Arc<str> =
            Arc::from(format!("pool-{}", POOL_INDEX.fetch_add(1, Ordering::Relaxed)));
        let recorder = config
            .metrics
            .enabled
            .then(|| MetricsRecorder::new(config.metrics.name_prefix.clone(), Arc::clone(&label)));
        let (shutdown_tx, _) = broadcast::channel(1);

        let pool = Arc::new_cyclic(|weak_self| Self {
            label,
            weak_self: weak_self.clone(),
            builder,
            channels: ArcSwap::from_pointee(Vec::new()),
            grow: Mutex::new(GrowState::default()),
            max_size: config.pool.max_size,
            min_size: config.pool.min_size,
            streams_low_watermark: config.pool.concurrent_streams_low_watermark,
            round_robin_on_bind: config.pool.use_round_robin_on_bind,
            fallback_enabled: config.resiliency.not_ready_fallback_enabled,
            unresponsive: config.resiliency.unresponsive(),
            method_affinity: config.method_affinity(),
            affinity: AffinityTable::new(),
            fallback: FallbackTable::new(),
            stats: Arc::new(PoolStats::new()),
            recorder,
            notifier: StateNotifier::new(runtime.clone()),
            runtime,
            monitors: Mutex::new(Vec::new()),
            metrics_logger: Mutex::new(None),
            shutdown_tx,
            shutdown: AtomicBool::new(false),
        });

        tracing::info!(
            pool = %pool.label,
            max_size = pool.max_size,
            min_size = pool.min_size,
            streams_low_watermark = pool.streams_low_watermark,
            fallback_enabled = pool.fallback_enabled,
            unresponsive_detection = pool.unresponsive.is_some(),
            "channel pool created"
        );

        pool.init_min_channels();

        if let Some(interval) = config.metrics.log_interval() {
            let logger = MetricsLogger::new(Arc::downgrade(&pool), interval)
                .start_with_shutdown(&pool.runtime, pool.shutdown_tx.subscribe());
            *pool.metrics_logger.lock() = Some(logger);
        }

        pool
    }

    fn init_min_channels(&self) {
        let grow = self.grow.lock();
        while self.channels.load().len() < self.min_size {
            self.create_channel(&grow);
        }
    }

    /// Appends a new channel. The caller proves it holds the grow lock.
    fn create_channel(&self, _grow: &MutexGuard<'_, GrowState>) -> Arc<ChannelHandle> {
        let id = self.channels.load().len();
        let handle = Arc::new(ChannelHandle::new(
            id,
            Arc::clone(&self.label),
            self.builder.build(),
            self.unresponsive,
            Arc::clone(&self.stats),
        ));

        self.channels.rcu(|current| {
            let mut channels = (**current).clone();
            channels.push(Arc::clone(&handle));
            channels
        });
        tracing::debug!(pool = %self.label, channel_id = id, "channel created");

        self.start_monitor(&handle);
        handle
    }

    /// Makes the first observation synchronously, then keeps watching in a task.
    fn start_monitor(&self, handle: &Arc<ChannelHandle>) {
        let changes = handle.channel().state_changes();
        let mut tracker = ConnectivityMonitor::new(handle.id());
        if self.observe_handle(handle, &mut tracker).is_terminal() {
            return;
        }
        let task = self.runtime.spawn(monitor::run(self.weak_self.clone(), tracker, changes));
        self.monitors.lock().push(task);
    }

    /// Feeds the current state of channel `id` to its monitor and applies the effects.
    pub(crate) fn observe_channel(
        &self,
        id: ChannelId,
        monitor: &mut ConnectivityMonitor,
    ) -> Option<StateTransition> {
        let handle = self.channel(id)?;
        Some(self.observe_handle(&handle, monitor))
    }

    fn observe_handle(
        &self,
        handle: &ChannelHandle,
        monitor: &mut ConnectivityMonitor,
    ) -> StateTransition {
        let id = handle.id();
        // Minimum channels are kept connected.
        let request_connection = id < self.min_size;
        let state = handle.channel().state(request_connection);
        let transition = monitor.observe(state, Instant::now());

        if transition.previous != Some(state) {
            tracing::debug!(
                pool = %self.label,
                channel_id = id,
                from = ?transition.previous,
                to = %state,
                "channel state changed"
            );
        }

        if transition.entered_ready {
            self.stats.channel_ready();
            if let Some(readiness) = transition.readiness_time {
                self.stats.record_readiness_time(readiness);
            }
        }
        if transition.left_ready {
            self.stats.channel_not_ready();
        }

        self.notifier.flush(&self.label);

        if self.fallback_enabled {
            match transition.fallback {
                FallbackAction::Clear => {
                    if self.fallback.mark_healthy(id) {
                        tracing::debug!(pool = %self.label, channel_id = id, "channel usable again");
                    }
                }
                FallbackAction::Mark => {
                    if self.fallback.mark_unhealthy(id) {
                        tracing::debug!(pool = %self.label, channel_id = id, "channel not ready, routing around it");
                    }
                }
            }
        }

        transition
    }

    /// Creates channel 0 if the pool is empty. Returns it only if this call created it.
    fn create_first_channel(&self) -> Option<Arc<ChannelHandle>> {
        if !self.channels.load().is_empty() {
            return None;
        }
        let grow = self.grow.lock();
        if self.channels.load().is_empty() {
            return Some(self.create_channel(&grow));
        }
        None
    }

    /// Creates a channel if the pool is below its maximum.
    fn try_create_channel(&self) -> Option<Arc<ChannelHandle>> {
        if self.channels.load().len() >= self.max_size {
            return None;
        }
        let grow = self.grow.lock();
        if self.channels.load().len() < self.max_size {
            return Some(self.create_channel(&grow));
        }
        None
    }

    /// Least-busy selection, growing the pool when every candidate is at or
    /// above the low watermark.
    ///
    /// With fallback enabled, prefers the least-busy channel that is usable and
    /// under the per-channel stream cap. `for_fallback` marks lookups made on
    /// behalf of an affinity fallback; those leave the fallback counters to the
    /// caller.
    pub fn pick_least_busy(&self, for_fallback: bool) -> Arc<ChannelHandle> {
        if let Some(first) = self.create_first_channel() {
            return first;
        }

        let channels = self.channels.load_full();
        let mut least_busy = &channels[0];
        let mut min_streams = least_busy.active_streams();
        let mut ready: Option<(&Arc<ChannelHandle>, usize)> = None;

        for handle in channels.iter() {
            let streams = handle.active_streams();
            if streams < min_streams {
                min_streams = streams;
                least_busy = handle;
            }
            if ready.map_or(true, |(_, ready_min)| streams < ready_min) &&
                !self.fallback.is_unhealthy(handle.id()) &&
                streams < MAX_STREAMS_PER_CHANNEL
            {
                ready = Some((handle, streams));
            }
        }

        let size = channels.len();

        if !self.fallback_enabled {
            if size < self.max_size && min_streams >= self.streams_low_watermark {
                if let Some(created) = self.try_create_channel() {
                    return created;
                }
            }
            return Arc::clone(least_busy);
        }

        let ready_min = ready.map_or(usize::MAX, |(_, streams)| streams);
        if size < self.max_size && ready_min >= self.streams_low_watermark {
            if let Some(created) = self.try_create_channel() {
                if !for_fallback && ready.is_none() {
                    tracing::trace!(pool = %self.label, channel_id = created.id(), "fallback to newly created channel");
                    self.stats.fallback_succeeded();
                }
                return created;
            }
        }

        if let Some((ready, _)) = ready {
            if !for_fallback && ready.id() != least_busy.id() {
                tracing::trace!(
                    pool = %self.label,
                    from = least_busy.id(),
                    to = ready.id(),
                    "picking fallback channel"
                );
                self.stats.fallback_succeeded();
            }
            return Arc::clone(ready);
        }

        if !for_fallback {
            tracing::trace!(pool = %self.label, channel_id = least_busy.id(), "no fallback channel available");
            self.stats.fallback_failed();
        }
        Arc::clone(least_busy)
    }

    /// Round-robin selection for bind calls. Grows to the maximum first.
    pub fn select_round_robin(&self) -> Arc<ChannelHandle> {
        let mut grow = self.grow.lock();
        let channels = self.channels.load_full();
        if channels.len() < self.max_size {
            return self.create_channel(&grow);
        }

        let next = grow.bind_cursor.map_or(0, |cursor| cursor + 1);
        let next = if next >= channels.len() { 0 } else { next };
        grow.bind_cursor = Some(next);
        Arc::clone(&channels[next])
    }

    /// Channel for a call whose response will bind new affinity keys.
    pub fn select_channel_for_bind(&self) -> Arc<ChannelHandle> {
        let handle = if self.round_robin_on_bind {
            self.select_round_robin()
        } else {
            self.select_channel(None)
        };
        tracing::trace!(pool = %self.label, channel_id = handle.id(), "channel picked for bind");
        handle
    }

    /// Channel for a call, optionally pinned by an affinity key.
    ///
    /// An unknown key is bound to the least-busy channel. With fallback
    /// enabled, keys bound to an unusable channel are served by a substitute
    /// which stays stable until either channel changes health.
    pub fn select_channel(&self, key: Option<&str>) -> Arc<ChannelHandle> {
        let key = match key {
            Some(key) if !key.is_empty() => key,
            _ => return self.pick_least_busy(false),
        };

        let Some(mapped) = self.affinity.get(key) else {
            let handle = self.pick_least_busy(false);
            self.bind(&handle, &[key.to_owned()]);
            return handle;
        };

        if !self.fallback_enabled {
            return mapped;
        }

        let Some(substitutions) = self.fallback.substitutions(mapped.id()) else {
            return mapped;
        };

        let substitute = substitutions.get(key).map(|entry| *entry.value());
        if let Some(substitute_id) = substitute {
            if !self.fallback.is_unhealthy(substitute_id) {
                if let Some(handle) = self.channel(substitute_id) {
                    tracing::trace!(pool = %self.label, from = mapped.id(), to = substitute_id, "using fallback channel");
                    self.stats.fallback_succeeded();
                    return handle;
                }
            }
        }

        let candidate = self.pick_least_busy(true);
        if !self.fallback.is_unhealthy(candidate.id()) &&
            candidate.active_streams() < MAX_STREAMS_PER_CHANNEL
        {
            if candidate.id() != mapped.id() {
                tracing::trace!(pool = %self.label, from = mapped.id(), to = candidate.id(), "setting fallback channel");
                self.stats.fallback_succeeded();
                substitutions.insert(key.to_owned(), candidate.id());
            }
            return candidate;
        }

        tracing::trace!(pool = %self.label, channel_id = mapped.id(), "failed to find fallback channel");
        self.stats.fallback_failed();
        // Stick with the previous substitute if there was one.
        substitute.and_then(|id| self.channel(id)).unwrap_or(mapped)
    }

    /// Binds `keys` to `handle`, moving keys bound elsewhere.
    pub fn bind(&self, handle: &Arc<ChannelHandle>, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        self.affinity.bind(handle, keys);
        tracing::trace!(pool = %self.label, channel_id = handle.id(), keys = keys.len(), "affinity keys bound");
    }

    /// Unbinds `keys`. Unknown keys are ignored.
    pub fn unbind(&self, keys: &[String]) {
        self.affinity.unbind(keys);
    }

    /// Affinity configuration of a fully qualified method.
    #[must_use]
    pub fn method_affinity(&self, method: &str) -> Option<&MethodAffinity> {
        self.method_affinity.get(method)
    }

    /// Affinity keys a message carries for `method`.
    ///
    /// Keys come from requests of `Unbind`/`Bound` methods and from responses
    /// of `Bind` methods. `Ok(None)` means the message is not relevant for
    /// affinity.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::DuplicateAffinityKey`] when a request that must
    /// carry a single key carries several.
    pub fn affinity_keys<M>(
        &self,
        method: &str,
        message: &M,
        is_request: bool,
    ) -> Result<Option<Vec<String>>, PoolError>
    where
        M: AffinityKeySource + ?Sized,
    {
        let Some(affinity) = self.method_affinity.get(method) else {
            return Ok(None);
        };

        match (is_request, affinity.command) {
            (true, AffinityCommand::Unbind | AffinityCommand::Bound) => {
                let keys = message.field_values(&affinity.affinity_key);
                if keys.len() > 1 {
                    return Err(PoolError::DuplicateAffinityKey {
                        method: method.to_owned(),
                        path: affinity.affinity_key.clone(),
                        count: keys.len(),
                    });
                }
                Ok(Some(keys))
            }
            (false, AffinityCommand::Bind) => {
                Ok(Some(message.field_values(&affinity.affinity_key)))
            }
            _ => Ok(None),
        }
    }

    /// Pool-wide connectivity state.
    ///
    /// With `request_connection`, an empty pool creates its first channel and
    /// every idle channel is asked to connect.
    pub fn state(&self, request_connection: bool) -> ConnectivityState {
        if request_connection {
            self.create_first_channel();
        }
        let channels = self.channels.load();
        ConnectivityState::aggregate(
            channels.iter().map(|handle| handle.channel().state(request_connection)),
        )
    }

    /// Runs `callback` once the pool state differs from `source`.
    ///
    /// If the state already differs the callback runs right away; otherwise it
    /// waits for the next channel transition. Callbacks arriving after shutdown
    /// are dropped.
    pub fn notify_when_state_changed<F>(&self, source: ConnectivityState, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.state(false) == source {
            self.notifier.enqueue(Box::new(callback));
            return;
        }
        if let Err(e) = self.notifier.execute(Box::new(callback)) {
            tracing::debug!(pool = %self.label, error = %e, "state change callback dropped");
        }
    }

    /// Authority of the backend, taken from channel 0.
    ///
    /// An empty pool builds a throw-away channel to ask.
    pub fn authority(&self) -> String {
        if let Some(first) = self.channels.load().first() {
            return first.channel().authority();
        }
        let channel = self.builder.build();
        let authority = channel.authority();
        channel.shutdown_now();
        authority
    }

    /// Starts an orderly shutdown of every channel. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            return;
        }
        tracing::info!(pool = %self.label, "shutting down channel pool");

        for handle in self.channels.load().iter() {
            if !handle.channel().is_shutdown() {
                handle.channel().shutdown();
            }
        }
        self.notifier.shutdown();
        let _ = self.shutdown_tx.send(());
    }

    /// Forcefully shuts down every channel, drops queued callbacks and stops
    /// all background tasks.
    pub fn shutdown_now(&self) {
        self.shutdown.store(true, Ordering::Release);
        tracing::info!(pool = %self.label, "shutting down channel pool now");

        for handle in self.channels.load().iter() {
            if !handle.channel().is_terminated() {
                handle.channel().shutdown_now();
            }
        }
        let dropped = self.notifier.shutdown_now();
        if dropped > 0 {
            tracing::debug!(pool = %self.label, dropped, "queued state change callbacks dropped");
        }
        let _ = self.shutdown_tx.send(());
        self.abort_tasks();
    }

    fn abort_tasks(&self) {
        for task in self.monitors.lock().drain(..) {
            task.abort();
        }
        if let Some(logger) = self.metrics_logger.lock().take() {
            logger.abort();
        }
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// `true` once shut down and every channel, callback and background task finished.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() &&
            self.channels.load().iter().all(|handle| handle.channel().is_terminated()) &&
            self.notifier.is_terminated() &&
            self.metrics_logger.lock().as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for termination, spending a single `timeout` across all channels,
    /// the metrics logger and pending callbacks.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        let channels = self.channels.load_full();
        for handle in channels.iter() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if !handle.channel().await_termination(remaining).await {
                return false;
            }
        }

        let logger = self.metrics_logger.lock().take();
        if let Some(mut logger) = logger {
            if tokio::time::timeout_at(deadline, &mut logger).await.is_err() {
                *self.metrics_logger.lock() = Some(logger);
                return false;
            }
        }

        self.notifier.await_drained(deadline).await && self.is_terminated()
    }

    /// Drains the stats windows into a snapshot and forwards it to the
    /// metrics recorder when metrics are enabled.
    pub fn report_metrics(&self) -> PoolMetricsSnapshot {
        let samples: Vec<_> =
            self.channels.load().iter().map(|handle| handle.take_sample()).collect();
        let snapshot = self.stats.report(&samples, self.max_size);
        if let Some(recorder) = &self.recorder {
            recorder.record(&snapshot);
        }
        snapshot
    }

    pub(crate) fn log_metrics(&self) {
        let channels = self.channels.load();
        let streams: Vec<usize> = channels.iter().map(|handle| handle.active_streams()).collect();
        let affinity: Vec<usize> = channels.iter().map(|handle| handle.affinity_count()).collect();
        tracing::debug!(pool = %self.label, active_streams = ?streams, "active streams per channel");
        tracing::debug!(pool = %self.label, affinity = ?affinity, "affinity per channel");

        let snapshot = self.report_metrics();
        tracing::debug!(pool = %self.label, metrics = ?snapshot, "pool metrics");
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Snapshot of the channel list; index equals channel id.
    #[must_use]
    pub fn channels(&self) -> Arc<Vec<Arc<ChannelHandle>>> {
        self.channels.load_full()
    }

    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<Arc<ChannelHandle>> {
        self.channels.load().get(id).cloned()
    }

    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.channels.load().len()
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[must_use]
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    #[must_use]
    pub fn streams_low_watermark(&self) -> usize {
        self.streams_low_watermark
    }

    #[must_use]
    pub fn fallback_enabled(&self) -> bool {
        self.fallback_enabled
    }

    #[must_use]
    pub fn min_active_streams(&self) -> usize {
        self.channels.load().iter().map(|handle| handle.active_streams()).min().unwrap_or(0)
    }

    #[must_use]
    pub fn max_active_streams(&self) -> usize {
        self.channels.load().iter().map(|handle| handle.active_streams()).max().unwrap_or(0)
    }

    #[must_use]
    pub fn affinity(&self) -> &AffinityTable {
        &self.affinity
    }

    #[must_use]
    pub fn fallback(&self) -> &FallbackTable {
        &self.fallback
    }

    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

impl Drop for ChannelPool {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
