//! Detection of channels that report `Ready` but stopped answering calls.
//!
//! Driven purely by call completions; there is no background timer. A channel
//! is declared unresponsive once enough consecutive `DeadlineExceeded` calls
//! pile up *and* no genuine response has been seen for the stall duration.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::types::StatusCode;

/// Thresholds for the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresponsiveConfig {
    /// Minimum time without a genuine response.
    pub stall: Duration,
    /// Minimum number of consecutive deadline-exceeded completions.
    pub dropped_count: u32,
}

/// A fired detection, returned to the caller so the forced-idle action can run
/// outside the detector's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Time since the last genuine response.
    pub elapsed: Duration,
    /// Deadline-exceeded completions counted, including the triggering one.
    pub dropped: u32,
}

#[derive(Debug)]
struct DetectorState {
    last_response: Instant,
    deadline_exceeded: u32,
}

/// Per-channel unresponsiveness heuristic.
#[derive(Debug)]
pub struct UnresponsiveDetector {
    config: UnresponsiveConfig,
    state: Mutex<DetectorState>,
}

impl UnresponsiveDetector {
    #[must_use]
    pub fn new(config: UnresponsiveConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    /// Creates a detector whose "last response" clock starts at `now`.
    #[must_use]
    pub fn new_at(config: UnresponsiveConfig, now: Instant) -> Self {
        Self { config, state: Mutex::new(DetectorState { last_response: now, deadline_exceeded: 0 }) }
    }

    #[must_use]
    pub fn config(&self) -> UnresponsiveConfig {
        self.config
    }

    /// Records a completed call.
    ///
    /// `started_at` is when the call began, `from_client_side` marks outcomes
    /// produced locally (cancellation, local deadline) rather than by the
    /// backend. Returns a [`Detection`] when the channel should be forced idle;
    /// the detector has already reset itself in that case.
    pub fn on_call_completed(
        &self,
        started_at: Instant,
        code: StatusCode,
        from_client_side: bool,
        now: Instant,
    ) -> Option<Detection> {
        let mut state = self.state.lock();

        if code != StatusCode::DeadlineExceeded {
            if !from_client_side {
                state.last_response = now;
                state.deadline_exceeded = 0;
            }
            return None;
        }

        // Issued before the last good response; says nothing about the channel now.
        if started_at < state.last_response {
            return None;
        }

        state.deadline_exceeded = state.deadline_exceeded.saturating_add(1);
        let elapsed = now.saturating_duration_since(state.last_response);
        if state.deadline_exceeded >= self.config.dropped_count && elapsed >= self.config.stall {
            let detection = Detection { elapsed, dropped: state.deadline_exceeded };
            state.last_response = now;
            state.deadline_exceeded = 0;
            return Some(detection);
        }

        None
    }

    /// Records that a message arrived on a call, proving the channel is alive.
    pub fn on_message_received(&self, now: Instant) {
        let mut state = self.state.lock();
        state.last_response = now;
        state.deadline_exceeded = 0;
    }

    /// Consecutive deadline-exceeded completions counted so far.
    #[must_use]
    pub fn deadline_exceeded_count(&self) -> u32 {
        self.state.lock().deadline_exceeded
    }

    #[must_use]
    pub fn last_response(&self) -> Instant {
        self.state.lock().last_response
    }
}
