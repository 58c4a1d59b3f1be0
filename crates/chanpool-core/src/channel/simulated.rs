//! In-memory channels whose connectivity is driven programmatically.
//!
//! Used by the simulation command and throughout the tests. A simulated channel
//! carries no calls; it only models the connectivity surface of a real one and
//! records how the pool poked it.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{ChannelBuilder, ManagedChannel};
use crate::types::ConnectivityState;

/// A channel with scripted connectivity.
///
/// With `auto_connect` enabled, a connection request on an idle channel walks
/// it through `Connecting` to `Ready` immediately.
pub struct SimulatedChannel {
    authority: String,
    auto_connect: bool,
    state_tx: watch::Sender<ConnectivityState>,
    terminated_tx: watch::Sender<bool>,
    shutdown: AtomicBool,
    shutdown_now_called: AtomicBool,
    connect_requests: AtomicUsize,
    idle_requests: AtomicUsize,
}

impl SimulatedChannel {
    #[must_use]
    pub fn new(authority: impl Into<String>, initial_state: ConnectivityState) -> Self {
        let (state_tx, _) = watch::channel(initial_state);
        let (terminated_tx, _) = watch::channel(false);
        Self {
            authority: authority.into(),
            auto_connect: false,
            state_tx,
            terminated_tx,
            shutdown: AtomicBool::new(false),
            shutdown_now_called: AtomicBool::new(false),
            connect_requests: AtomicUsize::new(0),
            idle_requests: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Moves the channel to `state`, notifying subscribers.
    ///
    /// Ignored once the channel is in `Shutdown`.
    pub fn set_state(&self, state: ConnectivityState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state || current.is_terminal() {
                return false;
            }
            *current = state;
            true
        });
    }

    #[must_use]
    pub fn current_state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    /// Number of `state(true)` calls observed while idle.
    #[must_use]
    pub fn connect_requests(&self) -> usize {
        self.connect_requests.load(Ordering::Relaxed)
    }

    /// Number of times the channel was forced to idle.
    #[must_use]
    pub fn idle_requests(&self) -> usize {
        self.idle_requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn was_shutdown_now(&self) -> bool {
        self.shutdown_now_called.load(Ordering::Relaxed)
    }

    fn terminate(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.state_tx.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = ConnectivityState::Shutdown;
            true
        });
        self.terminated_tx.send_replace(true);
    }
}

#[async_trait]
impl ManagedChannel for SimulatedChannel {
    fn authority(&self) -> String {
        self.authority.clone()
    }

    fn state(&self, request_connection: bool) -> ConnectivityState {
        let state = self.current_state();
        if request_connection && state == ConnectivityState::Idle {
            self.connect_requests.fetch_add(1, Ordering::Relaxed);
            if self.auto_connect {
                self.set_state(ConnectivityState::Connecting);
                self.set_state(ConnectivityState::Ready);
            }
        }
        state
    }

    fn state_changes(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    fn enter_idle(&self) {
        self.idle_requests.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectivityState::Idle);
    }

    fn shutdown(&self) {
        self.terminate();
    }

    fn shutdown_now(&self) {
        self.shutdown_now_called.store(true, Ordering::Relaxed);
        self.terminate();
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn is_terminated(&self) -> bool {
        *self.terminated_tx.borrow()
    }

    async fn await_termination(&self, timeout: Duration) -> bool {
        let mut rx = self.terminated_tx.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await;
        matches!(waited, Ok(Ok(_)))
    }
}

/// Builds [`SimulatedChannel`]s and keeps every channel it built, in build
/// order, so callers can drive them after handing the builder to a pool.
pub struct SimulatedChannelBuilder {
    authority: String,
    initial_state: ConnectivityState,
    auto_connect: bool,
    built: Mutex<Vec<Arc<SimulatedChannel>>>,
}

impl Default for SimulatedChannelBuilder {
    fn default() -> Self {
        Self::new("simulated.local:443")
    }
}

impl SimulatedChannelBuilder {
    #[must_use]
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            initial_state: ConnectivityState::Idle,
            auto_connect: false,
            built: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn initial_state(mut self, state: ConnectivityState) -> Self {
        self.initial_state = state;
        self
    }

    #[must_use]
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Channel built `index`-th, which is also its id in the pool that owns
    /// this builder.
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<Arc<SimulatedChannel>> {
        self.built.lock().get(index).cloned()
    }

    #[must_use]
    pub fn built(&self) -> usize {
        self.built.lock().len()
    }
}

impl ChannelBuilder for SimulatedChannelBuilder {
    fn build(&self) -> Arc<dyn ManagedChannel> {
        let channel = Arc::new(
            SimulatedChannel::new(self.authority.clone(), self.initial_state)
                .with_auto_connect(self.auto_connect),
        );
        self.built.lock().push(Arc::clone(&channel));
        channel
    }
}
