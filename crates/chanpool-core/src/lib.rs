//! # Chanpool Core
//!
//! Client-side connection pool for RPC channels. A [`pool::ChannelPool`] sits
//! in front of a transport and presents one logical channel backed by many
//! real ones:
//!
//! - **[`pool`]**: channel selection (least-busy, round-robin for bind calls,
//!   sticky by affinity key), affinity and fallback tables, connectivity
//!   monitoring and unresponsive-channel detection.
//!
//! - **[`channel`]**: the transport abstraction the pool drives, plus an
//!   in-memory simulated transport.
//!
//! - **[`metrics`]**: pool counters and windowed gauges, forwarded to the
//!   `metrics` facade.
//!
//! - **[`config`]**: layered configuration (defaults, TOML file, environment).
//!
//! - **[`logging`]**: `tracing` subscriber setup.
//!
//! ## Call Flow
//!
//! ```text
//! new call ──► ChannelPool::select_channel(key?)
//!                  │
//!          ┌───────┴────────┐
//!          ▼                ▼
//!    AffinityTable    least-busy scan ──► grow if every channel
//!          │                │              is at the low watermark
//!          ▼                │
//!    FallbackTable          │
//!   (channel unhealthy?)    │
//!          │                │
//!          └───────┬────────┘
//!                  ▼
//!           ChannelHandle ◄── on_stream_start / on_stream_end / on_message_received
//!                  │
//!                  ▼
//!       UnresponsiveDetector ──► enter_idle() ──► ConnectivityMonitor
//!                                                 updates FallbackTable
//! ```

pub mod channel;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod types;

pub use channel::{ChannelBuilder, ManagedChannel};
pub use config::AppConfig;
pub use pool::{ChannelHandle, ChannelPool, ChannelPoolBuilder, PoolError};
pub use types::{ChannelId, ConnectivityState, StatusCode};
