//! The channel pool: selection, affinity, fallback and health tracking.

pub mod affinity;
pub mod builder;
pub mod errors;
pub mod fallback;
pub mod handle;
pub mod keys;
pub mod manager;
pub mod monitor;
pub mod notifier;
pub mod unresponsive;

pub use affinity::AffinityTable;
pub use builder::ChannelPoolBuilder;
pub use errors::{BuilderError, PoolError};
pub use fallback::FallbackTable;
pub use handle::ChannelHandle;
pub use keys::{AffinityCommand, AffinityKeySource, MethodAffinity};
pub use manager::ChannelPool;
pub use monitor::{ConnectivityMonitor, FallbackAction, StateTransition};
pub use notifier::StateCallback;
pub use unresponsive::{Detection, UnresponsiveConfig, UnresponsiveDetector};
