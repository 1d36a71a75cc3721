//! Topic subscription management.
//!
//! - [`manager`]: the [`SubscriptionManager`] and its drive loop
//! - [`entry`]: per-topic entry and bus-handle state machine
//! - [`endpoint`]: per-endpoint state and remote endpoint registration
//! - [`stats`]: throughput accounting

pub mod endpoint;
pub mod entry;
pub mod manager;
pub mod stats;

pub use endpoint::EndpointConfig;
pub use entry::Listener;
pub use manager::{MONITOR_KEY_EXPR, SubscribeOptions, SubscriptionManager};
pub use stats::{MonitoredTopicStats, RateTracker, TopicStats};
