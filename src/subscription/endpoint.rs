//! Per-endpoint state.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::bus::{Session, SubscriberHandle};

use super::entry::{TopicKey, TopicSubscription};
use super::stats::RateTracker;

/// Registration of an additional named bus connection.
#[derive(Clone)]
pub struct EndpointConfig {
    /// Endpoint identifier used by every manager operation.
    pub id: String,
    /// Session to attach right away, if already connected.
    pub session: Option<Arc<dyn Session>>,
}

impl EndpointConfig {
    /// Endpoint with no session yet.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session: None,
        }
    }

    /// Attaches a session to the registration.
    #[must_use]
    pub fn with_session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("id", &self.id)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

/// Bus-wide monitor of one endpoint.
#[derive(Debug, Default)]
pub(crate) struct MonitorState {
    pub(crate) enabled: bool,
    /// Epoch of an in-flight declaration, if any.
    pub(crate) declaring: Option<u64>,
    pub(crate) handle: Option<Box<dyn SubscriberHandle>>,
    pub(crate) topics: HashMap<String, RateTracker>,
}

/// Everything the manager tracks for one logical bus connection.
#[derive(Default)]
pub(crate) struct EndpointState {
    pub(crate) session: Option<Arc<dyn Session>>,
    /// Bumped on every session change; stale declarations compare
    /// against it.
    pub(crate) epoch: u64,
    pub(crate) subscriptions: HashMap<TopicKey, TopicSubscription>,
    pub(crate) discovered_topics: BTreeSet<String>,
    pub(crate) monitor: MonitorState,
}

impl fmt::Debug for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointState")
            .field("connected", &self.session.is_some())
            .field("epoch", &self.epoch)
            .field("subscriptions", &self.subscriptions.len())
            .field("discovered_topics", &self.discovered_topics.len())
            .field("monitoring", &self.monitor.enabled)
            .finish()
    }
}

impl EndpointState {
    /// Detaches every live handle (monitor included), keeping listeners.
    pub(crate) fn detach_all(&mut self) -> Vec<Box<dyn SubscriberHandle>> {
        let mut handles: Vec<Box<dyn SubscriberHandle>> = self
            .subscriptions
            .values_mut()
            .filter_map(TopicSubscription::detach)
            .collect();
        self.monitor.declaring = None;
        handles.extend(self.monitor.handle.take());
        handles
    }

    /// Keys with at least one listener, sorted.
    pub(crate) fn listened_keys(&self) -> Vec<TopicKey> {
        let mut keys: Vec<TopicKey> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.has_listeners())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Topics with at least one listener, sorted and deduplicated.
    pub(crate) fn listened_topics(&self) -> Vec<String> {
        let topics: BTreeSet<String> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.has_listeners())
            .map(|(key, _)| key.topic.clone())
            .collect();
        topics.into_iter().collect()
    }

    /// The normal and the verbatim subscription of `topic`, where present.
    pub(crate) fn entries_for(&self, topic: &str) -> impl Iterator<Item = &TopicSubscription> {
        let normal = TopicKey::new(topic, false);
        let exact = TopicKey::new(topic, true);
        [normal, exact]
            .into_iter()
            .filter_map(move |key| self.subscriptions.get(&key))
    }
}
