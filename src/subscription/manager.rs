//! Topic subscription manager.
//!
//! [`SubscriptionManager`] multiplexes any number of listeners per logical
//! topic onto a single bus-level subscriber, per endpoint. Topics are
//! deduplicated by their normalized form, so `t`, `t/**` and the compact
//! spelling of `t` share one handle subscribed to `t/**`. Exact-match
//! subscriptions are keyed verbatim and get a handle of their own.
//!
//! # Concurrency
//!
//! All state sits behind one `std::sync::Mutex` that is never held across
//! an `.await`. Handle transitions go through [`drive`], which reads the
//! entry under the lock, decides the next bus operation, releases the lock
//! and performs it. An entry in `Declaring` or `Undeclaring` is owned by
//! the task that started the operation; other callers only update the
//! listener list and leave, and the owner re-checks the listeners once
//! its operation settles.
//!
//! Every session change bumps the endpoint epoch. Declarations and sample
//! handlers carry the epoch they were created under, so a declaration
//! that completes after a session swap is torn down again and samples
//! from a retired handle are ignored.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::endpoint::{EndpointConfig, EndpointState};
use super::entry::{HandleState, Listener, TopicKey, TopicSubscription};
use super::stats::{MonitoredTopicStats, RateTracker, TopicStats};
use crate::bus::{Sample, SampleHandler, Session, SubscriberHandle, key_expr_intersects};
use crate::config::DataplaneConfig;
use crate::domain::topic::display_name_matches;
use crate::domain::{DEFAULT_ENDPOINT, DataplaneEvent, EventBus, ListenerId};
use crate::error::DataplaneError;

/// Key expression of the bus-wide monitor.
pub const MONITOR_KEY_EXPR: &str = "**";

/// Options accepted by [`SubscriptionManager::subscribe`] and
/// [`SubscriptionManager::unsubscribe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Use the topic verbatim as both the dedup key and the bus key
    /// expression, without normalization or wildcard suffix.
    pub exact_match: bool,
}

impl SubscribeOptions {
    /// Options for a verbatim subscription.
    #[must_use]
    pub const fn exact() -> Self {
        Self { exact_match: true }
    }
}

/// Identity comparison of two optional sessions.
pub(crate) fn same_session(a: Option<&Arc<dyn Session>>, b: Option<&Arc<dyn Session>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

async fn teardown(handle: Box<dyn SubscriberHandle>) {
    let key_expr = handle.key_expr().to_string();
    if let Err(err) = handle.undeclare().await {
        tracing::warn!(%key_expr, error = %err, "bus subscriber teardown failed");
    }
}

fn dispatch(endpoint: &str, topic: &str, listeners: &[Listener], sample: &Sample) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(sample))).is_err() {
            tracing::warn!(
                %endpoint,
                %topic,
                key_expr = %sample.key_expr,
                "listener panicked, continuing with remaining listeners"
            );
        }
    }
}

/// Next bus operation decided by [`ManagerInner::next_step`].
enum Step {
    Declare {
        session: Arc<dyn Session>,
        key_expr: String,
        epoch: u64,
    },
    Undeclare(Box<dyn SubscriberHandle>),
}

/// What to do once a declaration settles.
enum Settled {
    Continue,
    Stop,
    Discard(Box<dyn SubscriberHandle>),
}

#[derive(Debug)]
struct ManagerInner {
    config: DataplaneConfig,
    event_bus: EventBus,
    endpoints: Mutex<HashMap<String, EndpointState>>,
}

impl ManagerInner {
    fn endpoints(&self) -> MutexGuard<'_, HashMap<String, EndpointState>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_step(&self, endpoint: &str, key: &TopicKey) -> Option<Step> {
        let mut endpoints = self.endpoints();
        let state = endpoints.get_mut(endpoint)?;
        let session = state.session.clone();
        let epoch = state.epoch;
        let sub = state.subscriptions.get_mut(key)?;
        if sub.state.in_flight() {
            return None;
        }

        let active = matches!(sub.state, HandleState::Active(_));
        match (active, sub.has_listeners(), session) {
            (true, true, _) => None,
            (true, false, _) => match std::mem::replace(&mut sub.state, HandleState::Undeclaring) {
                HandleState::Active(handle) => Some(Step::Undeclare(handle)),
                other => {
                    sub.state = other;
                    None
                }
            },
            (false, false, _) => {
                sub.state = HandleState::Idle;
                None
            }
            (false, true, Some(session)) => {
                sub.state = HandleState::Declaring { epoch };
                Some(Step::Declare {
                    session,
                    key_expr: sub.key_expr.clone(),
                    epoch,
                })
            }
            (false, true, None) => {
                sub.state = HandleState::Pending;
                None
            }
        }
    }

    fn settle_declare(
        &self,
        endpoint: &str,
        key: &TopicKey,
        epoch: u64,
        result: Result<Box<dyn SubscriberHandle>, DataplaneError>,
    ) -> Settled {
        let mut endpoints = self.endpoints();
        let current = endpoints
            .get_mut(endpoint)
            .filter(|state| state.epoch == epoch)
            .and_then(|state| state.subscriptions.get_mut(key))
            .filter(|sub| matches!(sub.state, HandleState::Declaring { epoch: e } if e == epoch));

        match (current, result) {
            (Some(sub), Ok(handle)) => {
                let key_expr = handle.key_expr().to_string();
                sub.state = HandleState::Active(handle);
                drop(endpoints);
                tracing::debug!(%endpoint, topic = %key, %key_expr, "bus subscriber declared");
                let _ = self.event_bus.publish(DataplaneEvent::SubscriptionDeclared {
                    endpoint: endpoint.to_string(),
                    topic: key.topic.clone(),
                    key_expr,
                    timestamp: Utc::now(),
                });
                Settled::Continue
            }
            (Some(sub), Err(err)) => {
                sub.state = HandleState::Pending;
                drop(endpoints);
                tracing::warn!(%endpoint, topic = %key, error = %err, "bus subscriber declaration failed, left pending");
                Settled::Stop
            }
            (None, Ok(handle)) => {
                drop(endpoints);
                tracing::debug!(%endpoint, topic = %key, "discarding declaration from a retired session");
                Settled::Discard(handle)
            }
            (None, Err(_)) => Settled::Stop,
        }
    }

    fn settle_undeclare(&self, endpoint: &str, key: &TopicKey) {
        {
            let mut endpoints = self.endpoints();
            let Some(sub) = endpoints
                .get_mut(endpoint)
                .and_then(|state| state.subscriptions.get_mut(key))
            else {
                return;
            };
            if matches!(sub.state, HandleState::Undeclaring) {
                sub.state = HandleState::Idle;
            }
        }
        tracing::debug!(%endpoint, topic = %key, "bus subscriber undeclared");
        let _ = self.event_bus.publish(DataplaneEvent::SubscriptionUndeclared {
            endpoint: endpoint.to_string(),
            topic: key.topic.clone(),
            timestamp: Utc::now(),
        });
    }

    fn deliver(&self, endpoint: &str, key: &TopicKey, epoch: u64, sample: &Sample) {
        let (listeners, first_seen) = {
            let mut endpoints = self.endpoints();
            let Some(state) = endpoints.get_mut(endpoint) else {
                return;
            };
            if state.epoch != epoch {
                return;
            }
            let first_seen = state.discovered_topics.insert(sample.key_expr.clone());
            let Some(sub) = state.subscriptions.get_mut(key) else {
                return;
            };
            sub.stats.record(sample.timestamp);
            (sub.listener_snapshot(), first_seen)
        };

        if first_seen {
            self.topic_discovered(endpoint, &sample.key_expr);
        }
        dispatch(endpoint, &key.topic, &listeners, sample);
    }

    fn deliver_monitored(&self, endpoint: &str, epoch: u64, sample: &Sample) {
        let first_seen = {
            let mut endpoints = self.endpoints();
            let Some(state) = endpoints.get_mut(endpoint) else {
                return;
            };
            if state.epoch != epoch || !state.monitor.enabled {
                return;
            }
            let first_seen = state.discovered_topics.insert(sample.key_expr.clone());
            let (capacity, window) = (self.config.hz_buffer_size, self.config.hz_window);
            state
                .monitor
                .topics
                .entry(sample.key_expr.clone())
                .or_insert_with(|| RateTracker::new(capacity, window))
                .record(sample.timestamp);
            first_seen
        };

        if first_seen {
            self.topic_discovered(endpoint, &sample.key_expr);
        }
    }

    fn topic_discovered(&self, endpoint: &str, key_expr: &str) {
        tracing::debug!(%endpoint, %key_expr, "topic discovered");
        let _ = self.event_bus.publish(DataplaneEvent::TopicDiscovered {
            endpoint: endpoint.to_string(),
            topic: key_expr.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn all_stats(&self) -> BTreeMap<String, TopicStats> {
        let endpoints = self.endpoints();
        let mut stats: BTreeMap<String, TopicStats> = BTreeMap::new();
        for (endpoint, state) in endpoints.iter() {
            for (key, sub) in &state.subscriptions {
                if !sub.has_listeners() {
                    continue;
                }
                let name = if endpoint == DEFAULT_ENDPOINT {
                    key.topic.clone()
                } else {
                    format!("{endpoint}:{}", key.topic)
                };
                match stats.entry(name) {
                    Entry::Occupied(mut merged) => merged.get_mut().absorb(&sub.topic_stats()),
                    Entry::Vacant(slot) => {
                        slot.insert(sub.topic_stats());
                    }
                }
            }
        }
        stats
    }
}

fn sample_handler(
    inner: &Arc<ManagerInner>,
    endpoint: &str,
    key: &TopicKey,
    epoch: u64,
) -> SampleHandler {
    let inner: Weak<ManagerInner> = Arc::downgrade(inner);
    let endpoint = endpoint.to_string();
    let key = key.clone();
    Arc::new(move |sample: Sample| {
        if let Some(inner) = inner.upgrade() {
            inner.deliver(&endpoint, &key, epoch, &sample);
        }
    })
}

fn monitor_handler(inner: &Arc<ManagerInner>, endpoint: &str, epoch: u64) -> SampleHandler {
    let inner: Weak<ManagerInner> = Arc::downgrade(inner);
    let endpoint = endpoint.to_string();
    Arc::new(move |sample: Sample| {
        if let Some(inner) = inner.upgrade() {
            inner.deliver_monitored(&endpoint, epoch, &sample);
        }
    })
}

/// Runs the bus operations an entry needs until it reaches a resting
/// state (`Idle`, `Pending` or `Active` matching its listeners).
async fn drive(inner: &Arc<ManagerInner>, endpoint: &str, key: &TopicKey) {
    while let Some(step) = inner.next_step(endpoint, key) {
        match step {
            Step::Declare {
                session,
                key_expr,
                epoch,
            } => {
                let handler = sample_handler(inner, endpoint, key, epoch);
                let result = session.declare_subscriber(&key_expr, handler).await;
                match inner.settle_declare(endpoint, key, epoch, result) {
                    Settled::Continue => {}
                    Settled::Stop => return,
                    Settled::Discard(handle) => {
                        teardown(handle).await;
                        return;
                    }
                }
            }
            Step::Undeclare(handle) => {
                teardown(handle).await;
                inner.settle_undeclare(endpoint, key);
            }
        }
    }
}

/// Multiplexes topic listeners onto bus subscribers across endpoints.
///
/// Cloning is cheap and yields a handle to the same manager. Every
/// operation takes the endpoint id explicitly; [`DEFAULT_ENDPOINT`]
/// always exists, other endpoints are created on first reference or via
/// [`Self::add_remote_endpoint`].
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    /// Creates a manager holding only the default endpoint, with no
    /// session attached.
    #[must_use]
    pub fn new(config: DataplaneConfig, event_bus: EventBus) -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(DEFAULT_ENDPOINT.to_string(), EndpointState::default());
        Self {
            inner: Arc::new(ManagerInner {
                config,
                event_bus,
                endpoints: Mutex::new(endpoints),
            }),
        }
    }

    /// Returns the event bus lifecycle events are published on.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    /// Session currently attached to `endpoint`.
    #[must_use]
    pub fn session(&self, endpoint: &str) -> Option<Arc<dyn Session>> {
        self.inner
            .endpoints()
            .get(endpoint)
            .and_then(|state| state.session.clone())
    }

    /// Attaches, replaces or detaches the session of `endpoint`.
    ///
    /// Every live handle of the endpoint (monitor included) is torn down
    /// first; subscriptions keep their listeners and are re-declared on
    /// the new session before this returns. Setting the session that is
    /// already attached is a no-op.
    pub async fn set_session(&self, session: Option<Arc<dyn Session>>, endpoint: &str) {
        let (retired, keys, monitoring) = {
            let mut endpoints = self.inner.endpoints();
            let state = endpoints.entry(endpoint.to_string()).or_default();
            if same_session(state.session.as_ref(), session.as_ref()) {
                return;
            }
            state.session.clone_from(&session);
            state.epoch = state.epoch.wrapping_add(1);
            let retired = state.detach_all();
            (retired, state.listened_keys(), state.monitor.enabled)
        };

        tracing::info!(
            %endpoint,
            connected = session.is_some(),
            retired = retired.len(),
            topics = keys.len(),
            "session changed"
        );
        for handle in retired {
            teardown(handle).await;
        }
        if session.is_none() {
            return;
        }

        for key in &keys {
            drive(&self.inner, endpoint, key).await;
        }
        if monitoring {
            self.arm_monitor(endpoint).await;
        }
    }

    /// Registers `listener` on `topic` and returns its id.
    ///
    /// The bus subscriber is created on demand if a session is attached
    /// and no teardown is in flight; otherwise the subscription stays
    /// pending and is declared by the next session change or teardown
    /// completion.
    pub async fn subscribe(
        &self,
        topic: &str,
        listener: Listener,
        endpoint: &str,
        options: SubscribeOptions,
    ) -> ListenerId {
        let key = TopicKey::new(topic, options.exact_match);
        let id = {
            let mut endpoints = self.inner.endpoints();
            let state = endpoints.entry(endpoint.to_string()).or_default();
            let (capacity, window) = (self.inner.config.hz_buffer_size, self.inner.config.hz_window);
            state
                .subscriptions
                .entry(key.clone())
                .or_insert_with(|| TopicSubscription::new(key.key_expr(), capacity, window))
                .add_listener(listener)
        };

        tracing::debug!(%endpoint, topic = %key, listener = %id, "listener added");
        drive(&self.inner, endpoint, &key).await;
        id
    }

    /// Removes a listener. The bus subscriber is torn down once the last
    /// listener is gone. Returns `false` if the listener was unknown.
    pub async fn unsubscribe(
        &self,
        topic: &str,
        listener_id: ListenerId,
        endpoint: &str,
        options: SubscribeOptions,
    ) -> bool {
        let key = TopicKey::new(topic, options.exact_match);
        let remaining = {
            let mut endpoints = self.inner.endpoints();
            let Some(sub) = endpoints
                .get_mut(endpoint)
                .and_then(|state| state.subscriptions.get_mut(&key))
            else {
                return false;
            };
            if !sub.remove_listener(listener_id) {
                return false;
            }
            sub.listeners.len()
        };

        tracing::debug!(%endpoint, topic = %key, listener = %listener_id, remaining, "listener removed");
        if remaining == 0 {
            drive(&self.inner, endpoint, &key).await;
        }
        true
    }

    /// Throughput of a topic, or `None` if it was never subscribed.
    ///
    /// A topic listened both normally and verbatim reports the sum of
    /// both subscriptions.
    #[must_use]
    pub fn get_topic_stats(&self, topic: &str, endpoint: &str) -> Option<TopicStats> {
        let endpoints = self.inner.endpoints();
        let state = endpoints.get(endpoint)?;
        state
            .entries_for(topic)
            .map(TopicSubscription::topic_stats)
            .reduce(|mut merged, other| {
                merged.absorb(&other);
                merged
            })
    }

    /// Throughput of every topic with at least one listener, across all
    /// endpoints. Keys of non-default endpoints are `"<endpoint>:<topic>"`.
    #[must_use]
    pub fn get_all_stats(&self) -> BTreeMap<String, TopicStats> {
        self.inner.all_stats()
    }

    /// Switches on the bus-wide monitor of `endpoint`.
    ///
    /// Returns `true` once a monitor subscriber is live or being
    /// declared; with no session attached the monitor is armed on the
    /// next session and `false` is returned.
    pub async fn start_monitoring(&self, endpoint: &str) -> bool {
        let newly_enabled = {
            let mut endpoints = self.inner.endpoints();
            let state = endpoints.entry(endpoint.to_string()).or_default();
            !std::mem::replace(&mut state.monitor.enabled, true)
        };
        if newly_enabled {
            tracing::info!(%endpoint, "monitoring started");
            let _ = self.inner.event_bus.publish(DataplaneEvent::MonitoringChanged {
                endpoint: endpoint.to_string(),
                enabled: true,
                timestamp: Utc::now(),
            });
        }
        self.arm_monitor(endpoint).await
    }

    async fn arm_monitor(&self, endpoint: &str) -> bool {
        let (session, epoch) = {
            let mut endpoints = self.inner.endpoints();
            let Some(state) = endpoints.get_mut(endpoint) else {
                return false;
            };
            if !state.monitor.enabled {
                return false;
            }
            if state.monitor.handle.is_some() || state.monitor.declaring.is_some() {
                return true;
            }
            let Some(session) = state.session.clone() else {
                return false;
            };
            state.monitor.declaring = Some(state.epoch);
            (session, state.epoch)
        };

        let handler = monitor_handler(&self.inner, endpoint, epoch);
        let result = session.declare_subscriber(MONITOR_KEY_EXPR, handler).await;

        let (installed, discard) = {
            let mut endpoints = self.inner.endpoints();
            let current = endpoints
                .get_mut(endpoint)
                .filter(|state| state.epoch == epoch && state.monitor.declaring == Some(epoch));
            match (current, result) {
                (Some(state), Ok(handle)) => {
                    state.monitor.declaring = None;
                    if state.monitor.enabled {
                        state.monitor.handle = Some(handle);
                        (true, None)
                    } else {
                        (false, Some(handle))
                    }
                }
                (Some(state), Err(err)) => {
                    state.monitor.declaring = None;
                    tracing::warn!(%endpoint, error = %err, "monitor declaration failed");
                    (false, None)
                }
                (None, Ok(handle)) => (false, Some(handle)),
                (None, Err(_)) => (false, None),
            }
        };

        if let Some(handle) = discard {
            teardown(handle).await;
        }
        installed
    }

    /// Switches off the bus-wide monitor of `endpoint` and forgets its
    /// per-key stats.
    pub async fn stop_monitoring(&self, endpoint: &str) {
        let (was_enabled, handle) = {
            let mut endpoints = self.inner.endpoints();
            let Some(state) = endpoints.get_mut(endpoint) else {
                return;
            };
            state.monitor.topics.clear();
            (
                std::mem::replace(&mut state.monitor.enabled, false),
                state.monitor.handle.take(),
            )
        };

        if let Some(handle) = handle {
            teardown(handle).await;
        }
        if was_enabled {
            tracing::info!(%endpoint, "monitoring stopped");
            let _ = self.inner.event_bus.publish(DataplaneEvent::MonitoringChanged {
                endpoint: endpoint.to_string(),
                enabled: false,
                timestamp: Utc::now(),
            });
        }
    }

    /// Whether the monitor of `endpoint` is switched on.
    #[must_use]
    pub fn is_monitoring_enabled(&self, endpoint: &str) -> bool {
        self.inner
            .endpoints()
            .get(endpoint)
            .is_some_and(|state| state.monitor.enabled)
    }

    /// Every key seen by the monitor of `endpoint`, flagged with whether
    /// a listened subscription covers it in either topic encoding.
    #[must_use]
    pub fn get_all_monitored_stats(&self, endpoint: &str) -> BTreeMap<String, MonitoredTopicStats> {
        let endpoints = self.inner.endpoints();
        let Some(state) = endpoints.get(endpoint) else {
            return BTreeMap::new();
        };
        let listened: Vec<(&TopicKey, &TopicSubscription)> = state
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.has_listeners())
            .collect();

        state
            .monitor
            .topics
            .iter()
            .map(|(key, tracker)| {
                let is_listened = listened.iter().any(|(topic, sub)| {
                    display_name_matches(key, &topic.topic) || key_expr_intersects(&sub.key_expr, key)
                });
                (key.clone(), tracker.monitored_stats(is_listened))
            })
            .collect()
    }

    /// Normalized topics of `endpoint` with at least one listener, sorted.
    #[must_use]
    pub fn get_active_subscriptions(&self, endpoint: &str) -> Vec<String> {
        self.inner
            .endpoints()
            .get(endpoint)
            .map(EndpointState::listened_topics)
            .unwrap_or_default()
    }

    /// Concrete keys seen on `endpoint`, sorted.
    #[must_use]
    pub fn get_discovered_topics(&self, endpoint: &str) -> Vec<String> {
        self.inner
            .endpoints()
            .get(endpoint)
            .map(|state| state.discovered_topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `topic` has at least one listener on `endpoint`.
    #[must_use]
    pub fn has_listeners(&self, topic: &str, endpoint: &str) -> bool {
        self.get_listener_count(topic, endpoint) > 0
    }

    /// Number of listeners of `topic` on `endpoint`, verbatim
    /// subscriptions included.
    #[must_use]
    pub fn get_listener_count(&self, topic: &str, endpoint: &str) -> usize {
        let endpoints = self.inner.endpoints();
        let Some(state) = endpoints.get(endpoint) else {
            return 0;
        };
        state
            .entries_for(topic)
            .map(|sub| sub.listeners.len())
            .sum()
    }

    /// Registered endpoint ids, sorted.
    #[must_use]
    pub fn endpoint_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.endpoints().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Registers a named remote endpoint, attaching its session if one is
    /// given. Returns `false` (and logs) if the id is already registered.
    pub async fn add_remote_endpoint(&self, config: EndpointConfig) -> bool {
        {
            let mut endpoints = self.inner.endpoints();
            if endpoints.contains_key(&config.id) {
                drop(endpoints);
                tracing::warn!(endpoint = %config.id, "endpoint already registered, ignoring");
                return false;
            }
            endpoints.insert(config.id.clone(), EndpointState::default());
        }
        tracing::info!(endpoint = %config.id, "remote endpoint added");

        if let Some(session) = config.session {
            self.set_session(Some(session), &config.id).await;
        }
        true
    }

    /// Removes an endpoint and tears down all of its bus subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`DataplaneError::ProtectedEndpoint`] for the default
    /// endpoint and [`DataplaneError::UnknownEndpoint`] for unregistered
    /// ids.
    pub async fn remove_endpoint(&self, endpoint: &str) -> Result<(), DataplaneError> {
        if endpoint == DEFAULT_ENDPOINT {
            tracing::warn!(%endpoint, "the default endpoint cannot be removed");
            return Err(DataplaneError::ProtectedEndpoint(endpoint.to_string()));
        }
        let Some(mut state) = self.inner.endpoints().remove(endpoint) else {
            return Err(DataplaneError::UnknownEndpoint(endpoint.to_string()));
        };

        let handles = state.detach_all();
        for handle in handles {
            teardown(handle).await;
        }
        tracing::info!(%endpoint, "endpoint removed");
        Ok(())
    }

    /// Stops monitoring, detaches every session and tears down every bus
    /// subscriber on every endpoint. Listeners stay registered.
    pub async fn destroy(&self) {
        let handles: Vec<Box<dyn SubscriberHandle>> = {
            let mut endpoints = self.inner.endpoints();
            endpoints
                .values_mut()
                .flat_map(|state| {
                    state.monitor.enabled = false;
                    state.monitor.topics.clear();
                    state.session = None;
                    state.epoch = state.epoch.wrapping_add(1);
                    state.detach_all()
                })
                .collect()
        };

        tracing::info!(handles = handles.len(), "subscription manager destroyed");
        for handle in handles {
            teardown(handle).await;
        }
    }

    /// Spawns a task publishing [`DataplaneEvent::StatsSnapshot`] every
    /// `interval`. The task ends once the manager is dropped.
    pub fn spawn_stats_ticker(&self, interval: Duration) -> JoinHandle<()> {
        let inner: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let stats = inner.all_stats();
                let _ = inner.event_bus.publish(DataplaneEvent::StatsSnapshot {
                    stats,
                    timestamp: Utc::now(),
                });
            }
        })
    }
}
