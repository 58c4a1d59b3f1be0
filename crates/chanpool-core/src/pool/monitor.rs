//! Per-channel connectivity tracking.
//!
//! [`ConnectivityMonitor`] is the explicit state machine: it consumes observed
//! states and yields the effects the pool must apply. The async watch loop
//! that feeds it lives in [`run`], spawned once per channel.

use std::{
    sync::Weak,
    time::{Duration, Instant},
};

use tokio::sync::watch;

use crate::{
    pool::manager::ChannelPool,
    types::{ChannelId, ConnectivityState},
};

/// What to do with a channel's fallback entry after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackAction {
    /// Channel is usable again; drop it from the fallback table.
    Clear,
    /// Channel is unusable; make sure it is in the fallback table.
    Mark,
}

impl FallbackAction {
    #[must_use]
    pub fn for_state(state: ConnectivityState) -> Self {
        if state.is_routable() {
            Self::Clear
        } else {
            Self::Mark
        }
    }
}

/// Effects of one observed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub previous: Option<ConnectivityState>,
    pub current: ConnectivityState,
    pub entered_ready: bool,
    pub left_ready: bool,
    /// Time from the last entry into `Connecting` until `Ready`.
    pub readiness_time: Option<Duration>,
    pub fallback: FallbackAction,
}

impl StateTransition {
    /// `true` once the channel reached its terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }
}

/// Connectivity state machine of one channel.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    channel_id: ChannelId,
    current: Option<ConnectivityState>,
    connecting_since: Option<Instant>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(channel_id: ChannelId) -> Self {
        Self { channel_id, current: None, connecting_since: None }
    }

    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    #[must_use]
    pub fn current(&self) -> Option<ConnectivityState> {
        self.current
    }

    /// Applies an observed state at time `now`.
    pub fn observe(&mut self, state: ConnectivityState, now: Instant) -> StateTransition {
        let previous = self.current;
        let was_ready = previous == Some(ConnectivityState::Ready);
        let is_ready = state == ConnectivityState::Ready;

        let entered_ready = is_ready && !was_ready;
        let left_ready = !is_ready && was_ready;

        let readiness_time = if entered_ready {
            self.connecting_since.take().map(|since| now.saturating_duration_since(since))
        } else {
            None
        };

        if state == ConnectivityState::Connecting && previous != Some(ConnectivityState::Connecting)
        {
            self.connecting_since = Some(now);
        }

        self.current = Some(state);

        StateTransition {
            previous,
            current: state,
            entered_ready,
            left_ready,
            readiness_time,
            fallback: FallbackAction::for_state(state),
        }
    }
}

/// Watches one channel until it shuts down or the pool is dropped.
///
/// The first observation is made synchronously by the pool when the channel
/// is created; this loop handles every later transition. Transitions that
/// happen faster than the loop runs are coalesced into the latest state.
pub(crate) async fn run(
    pool: Weak<ChannelPool>,
    mut monitor: ConnectivityMonitor,
    mut changes: watch::Receiver<ConnectivityState>,
) {
    let channel_id = monitor.channel_id();
    while changes.changed().await.is_ok() {
        let Some(pool) = pool.upgrade() else {
            break;
        };
        match pool.observe_channel(channel_id, &mut monitor) {
            Some(transition) if !transition.is_terminal() => {}
            _ => break,
        }
    }
    tracing::trace!(channel_id, "connectivity monitor stopped");
}
