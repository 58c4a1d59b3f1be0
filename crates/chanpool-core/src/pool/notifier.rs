use std::{
    pin::pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::Notify, time::Instant};

use crate::pool::errors::PoolError;

/// Boxed state-change callback.
pub type StateCallback = Box<dyn FnOnce() + Send + 'static>;

/// Executor for pool-wide state-change callbacks.
///
/// Callbacks registered against the current state wait in `pending` until the
/// next channel transition; others run right away on the runtime.
pub(crate) struct StateNotifier {
    runtime: Handle,
    pending: Mutex<Vec<StateCallback>>,
    shut_down: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl StateNotifier {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Runs `callback` on the runtime.
    pub(crate) fn execute(&self, callback: StateCallback) -> Result<(), PoolError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::NotificationRejected);
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let in_flight = Arc::clone(&self.in_flight);
        let drained = Arc::clone(&self.drained);
        self.runtime.spawn(async move {
            callback();
            if in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                drained.notify_waiters();
            }
        });
        Ok(())
    }

    /// Parks `callback` until the next [`flush`](Self::flush).
    pub(crate) fn enqueue(&self, callback: StateCallback) {
        self.pending.lock().push(callback);
    }

    /// Runs every parked callback.
    pub(crate) fn flush(&self, pool: &str) {
        let callbacks = std::mem::take(&mut *self.pending.lock());
        for callback in callbacks {
            if let Err(e) = self.execute(callback) {
                tracing::debug!(pool, error = %e, "state change callback dropped");
                break;
            }
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    /// Stops accepting callbacks and discards the parked ones.
    pub(crate) fn shutdown_now(&self) -> usize {
        self.shutdown();
        std::mem::take(&mut *self.pending.lock()).len()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.shut_down.load(Ordering::Acquire) && self.in_flight.load(Ordering::Acquire) == 0
    }

    /// Waits until no callback is running, or `deadline` passes.
    pub(crate) async fn await_drained(&self, deadline: Instant) -> bool {
        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight.load(Ordering::Acquire) == 0;
            }
        }
    }
}
