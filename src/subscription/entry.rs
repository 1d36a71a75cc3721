//! Per-topic subscription entry and its bus-handle state machine.
//!
//! ```text
//!            subscribe             declare ok
//!   Idle ──────────────► Pending ─────► Declaring ─────► Active
//!    ▲                     ▲               │ declare err     │ last listener gone
//!    │                     └───────────────┘                 ▼
//!    └────────────── no listeners ◄─────────────────── Undeclaring
//!                    listeners back ──► Pending
//! ```
//!
//! Only the manager's drive loop moves an entry between states, and it
//! does so under the manager lock. `Declaring` and `Undeclaring` mark an
//! in-flight bus operation: whoever started it owns the next transition,
//! which is what keeps at most one live handle per topic.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{Sample, SubscriberHandle};
use crate::domain::ListenerId;
use crate::domain::topic::{normalize_topic_pattern, subscription_key_expr};

use super::stats::{RateTracker, TopicStats};

/// Callback invoked for every sample delivered on a subscribed topic.
pub type Listener = Arc<dyn Fn(&Sample) + Send + Sync>;

/// Identity of a subscription within an endpoint.
///
/// Normal subscriptions are keyed by their normalized topic. Verbatim
/// (exact-match) subscriptions keep the topic as given and live in their
/// own key space, so the two never share a bus subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct TopicKey {
    pub(crate) topic: String,
    pub(crate) exact: bool,
}

impl TopicKey {
    pub(crate) fn new(topic: &str, exact: bool) -> Self {
        let topic = if exact {
            topic.to_string()
        } else {
            normalize_topic_pattern(topic)
        };
        Self { topic, exact }
    }

    /// Bus key expression of the entry, derived from the key alone.
    pub(crate) fn key_expr(&self) -> String {
        subscription_key_expr(&self.topic, self.exact)
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exact {
            write!(f, "{} (exact)", self.topic)
        } else {
            f.write_str(&self.topic)
        }
    }
}

/// Bus-handle state of one topic subscription.
pub(crate) enum HandleState {
    /// No handle and nobody waiting for one.
    Idle,
    /// Listeners exist but no handle could be created yet.
    Pending,
    /// A declaration against the session of `epoch` is in flight.
    Declaring {
        /// Endpoint session epoch the declaration was issued under.
        epoch: u64,
    },
    /// A live bus handle.
    Active(Box<dyn SubscriberHandle>),
    /// A teardown is in flight.
    Undeclaring,
}

impl HandleState {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Declaring { .. } => "declaring",
            Self::Active(_) => "active",
            Self::Undeclaring => "undeclaring",
        }
    }

    /// Whether a bus operation owns the next transition.
    pub(crate) const fn in_flight(&self) -> bool {
        matches!(self, Self::Declaring { .. } | Self::Undeclaring)
    }
}

impl fmt::Debug for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One subscription per normalized topic per endpoint.
///
/// The entry outlives its listeners and is reused when the topic is
/// subscribed again.
pub(crate) struct TopicSubscription {
    /// Key expression handed to the bus.
    pub(crate) key_expr: String,
    /// Listeners in registration order.
    pub(crate) listeners: Vec<(ListenerId, Listener)>,
    pub(crate) stats: RateTracker,
    pub(crate) state: HandleState,
}

impl fmt::Debug for TopicSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicSubscription")
            .field("key_expr", &self.key_expr)
            .field("listeners", &self.listeners.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TopicSubscription {
    pub(crate) fn new(key_expr: String, hz_buffer_size: usize, hz_window: Duration) -> Self {
        Self {
            key_expr,
            listeners: Vec::new(),
            stats: RateTracker::new(hz_buffer_size, hz_window),
            state: HandleState::Idle,
        }
    }

    pub(crate) fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    pub(crate) fn add_listener(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push((id, listener));
        id
    }

    /// Removes a listener, returning `true` if it was registered.
    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub(crate) fn listener_snapshot(&self) -> Vec<Listener> {
        self.listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub(crate) fn topic_stats(&self) -> TopicStats {
        self.stats.topic_stats(self.listeners.len())
    }

    /// Detaches a live handle for teardown outside the lock, leaving the
    /// entry `Pending` or `Idle` depending on its listeners.
    pub(crate) fn detach(&mut self) -> Option<Box<dyn SubscriberHandle>> {
        let next = if self.has_listeners() {
            HandleState::Pending
        } else {
            HandleState::Idle
        };
        match std::mem::replace(&mut self.state, next) {
            HandleState::Active(handle) => Some(handle),
            HandleState::Undeclaring => {
                self.state = HandleState::Undeclaring;
                None
            }
            _ => None,
        }
    }
}
