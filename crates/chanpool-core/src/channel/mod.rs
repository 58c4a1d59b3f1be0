//! Transport abstraction for the channels a pool manages.
//!
//! The pool never speaks a wire protocol. It only needs to create channels,
//! observe their connectivity, nudge them (connect now, drop to idle) and shut
//! them down. [`ManagedChannel`] captures exactly that surface; transports plug
//! in by implementing it and handing the pool a [`ChannelBuilder`].

pub mod simulated;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::types::ConnectivityState;

/// A single backend channel as seen by the pool.
#[async_trait]
pub trait ManagedChannel: Send + Sync {
    /// Authority (host\[:port\]) this channel connects to.
    fn authority(&self) -> String;

    /// Current connectivity state.
    ///
    /// When `request_connection` is `true` and the channel is idle, the channel
    /// starts connecting as a side effect.
    fn state(&self, request_connection: bool) -> ConnectivityState;

    /// Subscribes to connectivity transitions.
    ///
    /// The receiver always holds the latest state; intermediate transitions may
    /// be coalesced when the observer is slower than the transport.
    fn state_changes(&self) -> watch::Receiver<ConnectivityState>;

    /// Drops the current connection and moves the channel to `Idle`.
    fn enter_idle(&self);

    /// Starts an orderly shutdown. In-flight calls are allowed to finish.
    fn shutdown(&self);

    /// Starts a forceful shutdown, cancelling in-flight calls.
    fn shutdown_now(&self);

    fn is_shutdown(&self) -> bool;

    fn is_terminated(&self) -> bool;

    /// Waits until the channel has terminated or `timeout` elapses.
    ///
    /// Returns `true` if the channel terminated in time.
    async fn await_termination(&self, timeout: Duration) -> bool;
}

/// Factory the pool uses whenever it grows.
pub trait ChannelBuilder: Send + Sync {
    fn build(&self) -> Arc<dyn ManagedChannel>;
}

impl<F> ChannelBuilder for F
where
    F: Fn() -> Arc<dyn ManagedChannel> + Send + Sync,
{
    fn build(&self) -> Arc<dyn ManagedChannel> {
        self()
    }
}
