//! Events describing schema and subscription lifecycle changes.
//!
//! Every notable state change emits a [`DataplaneEvent`] through the
//! [`super::EventBus`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::subscription::TopicStats;

/// Data-plane event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DataplaneEvent {
    /// A descriptor set was loaded as a new schema source.
    SchemaLoaded {
        /// Synthetic source key (`core:<reply>` or `node:<prefix>`).
        source_key: String,
        /// Human-readable source label.
        label: String,
        /// Number of message types the source contributes.
        type_count: usize,
        /// Load timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A node schema query failed; the prefix entered its cooldown.
    SchemaFetchFailed {
        /// Node prefix that was queried.
        prefix: String,
        /// Failure description.
        reason: String,
        /// Failure timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A bus-level subscriber was declared for a topic.
    SubscriptionDeclared {
        /// Endpoint identifier.
        endpoint: String,
        /// Normalized topic.
        topic: String,
        /// Key expression handed to the bus.
        key_expr: String,
        /// Declaration timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A bus-level subscriber was torn down.
    SubscriptionUndeclared {
        /// Endpoint identifier.
        endpoint: String,
        /// Normalized topic.
        topic: String,
        /// Teardown timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A concrete key was seen for the first time on an endpoint.
    TopicDiscovered {
        /// Endpoint identifier.
        endpoint: String,
        /// Concrete key of the first sample.
        topic: String,
        /// Discovery timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Bus-wide monitoring was switched on or off.
    MonitoringChanged {
        /// Endpoint identifier.
        endpoint: String,
        /// New state.
        enabled: bool,
        /// Change timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Periodic throughput snapshot of every listened topic.
    StatsSnapshot {
        /// Stats keyed like [`crate::subscription::SubscriptionManager::get_all_stats`].
        stats: BTreeMap<String, TopicStats>,
        /// Snapshot timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl DataplaneEvent {
    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::SchemaLoaded { .. } => "schema_loaded",
            Self::SchemaFetchFailed { .. } => "schema_fetch_failed",
            Self::SubscriptionDeclared { .. } => "subscription_declared",
            Self::SubscriptionUndeclared { .. } => "subscription_undeclared",
            Self::TopicDiscovered { .. } => "topic_discovered",
            Self::MonitoringChanged { .. } => "monitoring_changed",
            Self::StatsSnapshot { .. } => "stats_snapshot",
        }
    }

    /// Returns the endpoint the event belongs to, if it is endpoint-scoped.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::SubscriptionDeclared { endpoint, .. }
            | Self::SubscriptionUndeclared { endpoint, .. }
            | Self::TopicDiscovered { endpoint, .. }
            | Self::MonitoringChanged { endpoint, .. } => Some(endpoint),
            Self::SchemaLoaded { .. } | Self::SchemaFetchFailed { .. } | Self::StatsSnapshot { .. } => {
                None
            }
        }
    }
}
