//! Shared value types used across the pool: channel identities, connectivity
//! states and call status codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a channel within its pool.
///
/// Equal to the channel's position in the pool's channel list. Assigned once at
/// creation and never reused.
pub type ChannelId = usize;

/// Connectivity state of a single channel or of the pool as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityState {
    /// No connection and no attempt in progress.
    Idle,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and able to carry calls.
    Ready,
    /// The last connection attempt failed; the transport will retry.
    TransientFailure,
    /// Terminal state. The channel will never leave it.
    Shutdown,
}

impl ConnectivityState {
    /// Returns `true` for the terminal `Shutdown` state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Returns `true` when a channel in this state may be used for routing
    /// without falling back to another channel.
    ///
    /// `Idle` counts as usable because the first call on an idle channel makes
    /// the transport connect.
    #[must_use]
    pub fn is_routable(self) -> bool {
        matches!(self, Self::Ready | Self::Idle)
    }

    /// Folds per-channel states into a single pool-wide state.
    ///
    /// Priority, highest first: `Ready`, `Connecting`, `TransientFailure`,
    /// `Idle`, `Shutdown`. An empty input is `Idle`.
    pub fn aggregate<I>(states: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let mut seen = [false; 5];
        for state in states {
            if state == Self::Ready {
                return Self::Ready;
            }
            seen[state.priority_slot()] = true;
        }

        [Self::Connecting, Self::TransientFailure, Self::Idle, Self::Shutdown]
            .into_iter()
            .find(|state| seen[state.priority_slot()])
            .unwrap_or(Self::Idle)
    }

    fn priority_slot(self) -> usize {
        match self {
            Self::Ready => 0,
            Self::Connecting => 1,
            Self::TransientFailure => 2,
            Self::Idle => 3,
            Self::Shutdown => 4,
        }
    }

    /// Returns a static string representation for log fields and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::TransientFailure => "TRANSIENT_FAILURE",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a call, using the gRPC status code space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Maps a numeric gRPC status code. Unknown values map to `Unknown`.
    #[must_use]
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}
