use thiserror::Error;

/// Errors surfaced by pool operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    /// A message declared to carry a single affinity key carried several.
    #[error("duplicate affinity key in {method}: {count} values found at '{path}'")]
    DuplicateAffinityKey { method: String, path: String, count: usize },

    /// A state-change callback arrived after the notification executor shut down.
    #[error("state change notification rejected: pool is shut down")]
    NotificationRejected,
}

/// Errors that can occur when building a pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuilderError {
    #[error("channel builder is required")]
    MissingChannelBuilder,

    /// Monitors and notifications run on tokio; a pool cannot be built outside a runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
