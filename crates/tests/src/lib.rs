//! Integration Tests for Chanpool
//!
//! Every test drives a real [`ChannelPool`](chanpool_core::ChannelPool) over
//! simulated channels:
//!
//! - `affinity_tests`: key binding under contention and the bind/bound/unbind method flow
//! - `fallback_tests`: routing around channels that are not ready, and recovery
//! - `growth_tests`: pool growth at the low watermark and round-robin bind selection
//! - `unresponsive_tests`: forced idling of channels that stop answering
//! - `state_tests`: pool-wide connectivity state
//! - `lifecycle_tests`: state-change notifications, shutdown and termination
//! - `support`: pool construction and polling helpers
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod affinity_tests;


#[cfg(test)]
mod growth_tests;

#[cfg(test)]
mod unresponsive_tests;

#[cfg(test)]
mod state_tests;

#[cfg(test)]
mod lifecycle_tests;

/// Shared helpers for building pools in tests
pub mod support;
