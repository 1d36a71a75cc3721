//! Telemetry service: decoded topic streams.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::bus::{Sample, Session};
use crate::config::DataplaneConfig;
use crate::domain::topic::extract_prefix;
use crate::domain::{DEFAULT_ENDPOINT, ListenerId};
use crate::error::DataplaneError;
use crate::schema::{DecodeResult, SchemaRegistry};
use crate::subscription::manager::same_session;
use crate::subscription::{Listener, SubscribeOptions, SubscriptionManager};

/// A sample as handed to [`TelemetryService::watch_topic`] callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    /// Concrete key the sample was published under.
    pub topic: String,
    /// Raw payload, for callers falling back to a text or hex preview.
    pub payload: Bytes,
    /// Decoded message, if any schema source could decode it.
    pub decoded: Option<DecodeResult>,
    /// Reception timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Callback receiving decoded samples.
pub type SampleCallback = Arc<dyn Fn(DecodedSample) + Send + Sync>;

#[derive(Debug)]
struct ServiceInner {
    registry: Arc<SchemaRegistry>,
    manager: SubscriptionManager,
    config: DataplaneConfig,
    /// Discovery keys (node prefix, or topic when it has none) with a
    /// discovery task in flight.
    discovering: Mutex<HashSet<String>>,
}

impl ServiceInner {
    fn discovering(&self) -> MutexGuard<'_, HashSet<String>> {
        self.discovering.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode(self: &Arc<Self>, endpoint: &str, sample: &Sample) -> Option<DecodeResult> {
        let decoded = self
            .registry
            .try_decode_for_topic(&sample.key_expr, &sample.payload);
        if decoded.is_none() {
            self.kick_discovery(endpoint, &sample.key_expr);
        }
        decoded
    }

    fn session(&self, endpoint: &str) -> Result<Arc<dyn Session>, DataplaneError> {
        self.manager
            .session(endpoint)
            .ok_or_else(|| DataplaneError::SessionUnavailable(endpoint.to_string()))
    }

    /// Spawns schema discovery for `topic` unless its node is already
    /// known, cooling down, or being discovered.
    fn kick_discovery(self: &Arc<Self>, endpoint: &str, topic: &str) {
        let prefix = extract_prefix(topic);
        if let Some(prefix) = &prefix
            && (self.registry.has_succeeded_prefix(prefix)
                || self.registry.is_prefix_in_cooldown(prefix))
        {
            return;
        }
        let session = match self.session(endpoint) {
            Ok(session) => session,
            Err(err) => {
                tracing::debug!(%topic, error = %err, "schema discovery deferred");
                return;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(%topic, "no runtime available for schema discovery");
            return;
        };

        let key = prefix.unwrap_or_else(|| topic.to_string());
        if !self.discovering().insert(key.clone()) {
            return;
        }

        tracing::debug!(%endpoint, %topic, "decode miss, discovering schema");
        let generation = self.registry.generation();
        let inner = Arc::clone(self);
        let topic = topic.to_string();
        runtime.spawn(async move {
            let found = inner
                .registry
                .discover_schema_for_topic_in(session.as_ref(), &topic, generation)
                .await;
            inner.discovering().remove(&key);
            tracing::debug!(%topic, found, "schema discovery finished");
        });
    }
}

/// Glue between subscriptions and schema decoding.
///
/// Cloning is cheap and yields a handle to the same service.
#[derive(Debug, Clone)]
pub struct TelemetryService {
    inner: Arc<ServiceInner>,
}

impl TelemetryService {
    /// Creates a new `TelemetryService`.
    #[must_use]
    pub fn new(
        registry: Arc<SchemaRegistry>,
        manager: SubscriptionManager,
        config: DataplaneConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                registry,
                manager,
                config,
                discovering: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Returns a reference to the inner [`SchemaRegistry`].
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.registry
    }

    /// Returns a reference to the inner [`SubscriptionManager`].
    #[must_use]
    pub fn manager(&self) -> &SubscriptionManager {
        &self.inner.manager
    }

    /// Attaches or replaces the session of `endpoint`.
    ///
    /// A new session on the default endpoint resets the registry, since
    /// the schemas may have changed, and fetches the daemon's core
    /// schemas (machine-scoped when machine ids are configured).
    /// Re-attaching the session already in place is a no-op.
    pub async fn set_session(&self, session: Option<Arc<dyn Session>>, endpoint: &str) {
        let current = self.inner.manager.session(endpoint);
        if same_session(current.as_ref(), session.as_ref()) {
            tracing::debug!(%endpoint, "session unchanged");
            return;
        }

        let is_default = endpoint == DEFAULT_ENDPOINT;
        if is_default {
            self.inner.registry.clear();
        }
        self.inner.manager.set_session(session.clone(), endpoint).await;

        if is_default && let Some(session) = session {
            let machine_ids = &self.inner.config.machine_ids;
            let scoped = (!machine_ids.is_empty()).then_some(machine_ids.as_slice());
            let loaded = self
                .inner
                .registry
                .fetch_core_schemas(session.as_ref(), scoped)
                .await;
            tracing::info!(core_schemas = loaded, "default session attached");
        }
    }

    /// Watches `topic` on `endpoint`, delivering every sample decoded
    /// (or with `decoded: None`) to `callback`.
    pub async fn watch_topic(
        &self,
        topic: &str,
        endpoint: &str,
        callback: SampleCallback,
    ) -> ListenerId {
        let service: Weak<ServiceInner> = Arc::downgrade(&self.inner);
        let listener_endpoint = endpoint.to_string();
        let listener: Listener = Arc::new(move |sample: &Sample| {
            let Some(service) = service.upgrade() else {
                return;
            };
            let decoded = service.decode(&listener_endpoint, sample);
            callback(DecodedSample {
                topic: sample.key_expr.clone(),
                payload: sample.payload.clone(),
                decoded,
                timestamp: sample.timestamp,
            });
        });

        let id = self
            .inner
            .manager
            .subscribe(topic, listener, endpoint, SubscribeOptions::default())
            .await;
        tracing::info!(%topic, %endpoint, listener = %id, "watching topic");
        id
    }

    /// Stops a watch started by [`Self::watch_topic`].
    pub async fn unwatch_topic(&self, topic: &str, id: ListenerId, endpoint: &str) -> bool {
        self.inner
            .manager
            .unsubscribe(topic, id, endpoint, SubscribeOptions::default())
            .await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::bus::MemoryBus;
    use crate::domain::EventBus;
    use crate::domain::topic::node_schema_key;
    use crate::schema::fixtures;

    const TOPIC: &str = "bubbaloop/local/m1/weather/current";
    const PREFIX: &str = "bubbaloop/local/m1/weather";

    fn service() -> TelemetryService {
        let config = DataplaneConfig::default();
        let event_bus = EventBus::new(256);
        let registry = Arc::new(SchemaRegistry::new(config.clone(), event_bus.clone()));
        let manager = SubscriptionManager::new(config.clone(), event_bus);
        TelemetryService::new(registry, manager, config)
    }

    fn session(bus: &MemoryBus) -> Arc<dyn Session> {
        Arc::new(bus.clone())
    }

    fn collector() -> (SampleCallback, Arc<Mutex<Vec<DecodedSample>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: SampleCallback = Arc::new(move |sample: DecodedSample| {
            sink.lock().unwrap_or_else(PoisonError::into_inner).push(sample);
        });
        (callback, seen)
    }

    fn drain(seen: &Arc<Mutex<Vec<DecodedSample>>>) -> Vec<DecodedSample> {
        std::mem::take(&mut *seen.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[tokio::test]
    async fn decode_miss_triggers_discovery() {
        let service = service();
        let bus = MemoryBus::new();
        bus.serve_bytes(
            &node_schema_key(PREFIX),
            Bytes::from(fixtures::weather_descriptor_bytes()),
        );
        service.set_session(Some(session(&bus)), DEFAULT_ENDPOINT).await;

        let (callback, seen) = collector();
        service.watch_topic(TOPIC, DEFAULT_ENDPOINT, callback).await;

        let payload = fixtures::encode_current_weather(23.5, 65.0);
        bus.publish(TOPIC, payload.clone());
        let first = drain(&seen);
        assert_eq!(first.len(), 1);
        assert!(first.first().is_some_and(|s| s.decoded.is_none()));

        for _ in 0..50 {
            if service.registry().has_succeeded_prefix(PREFIX) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.query_count(&node_schema_key(PREFIX)), 1);

        bus.publish(TOPIC, payload);
        let second = drain(&seen);
        let Some(decoded) = second.first().and_then(|s| s.decoded.clone()) else {
            panic!("second sample should decode");
        };
        assert_eq!(decoded.type_name, "weather.v1.CurrentWeather");
        assert_eq!(decoded.data["temperature"], json!(23.5));
        assert_eq!(decoded.data["humidity"], json!(65.0));
    }

    #[tokio::test]
    async fn default_session_fetches_core_schemas() {
        let service = service();
        let bus = MemoryBus::new();
        bus.serve_bytes(
            "bubbaloop/daemon/api/schemas",
            Bytes::from(fixtures::camera_descriptor_bytes()),
        );
        service.set_session(Some(session(&bus)), DEFAULT_ENDPOINT).await;
        assert!(service.registry().has_type("bubbaloop.camera.v1.CompressedImage"));

        service.set_session(None, DEFAULT_ENDPOINT).await;
        assert_eq!(service.registry().source_count(), 0);
    }

    #[tokio::test]
    async fn reattaching_the_same_session_keeps_loaded_schemas() {
        let service = service();
        let bus = MemoryBus::new();
        bus.serve_bytes(
            &node_schema_key(PREFIX),
            Bytes::from(fixtures::weather_descriptor_bytes()),
        );
        let attached = session(&bus);
        service.set_session(Some(Arc::clone(&attached)), DEFAULT_ENDPOINT).await;
        assert!(service.registry().fetch_node_schema(&bus, PREFIX).await);
        assert_eq!(service.registry().source_count(), 1);

        service.set_session(Some(Arc::clone(&attached)), DEFAULT_ENDPOINT).await;
        assert_eq!(service.registry().source_count(), 1);
        assert!(service.registry().has_succeeded_prefix(PREFIX));

        service.set_session(Some(session(&bus)), DEFAULT_ENDPOINT).await;
        assert_eq!(service.registry().source_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_from_a_replaced_session_is_discarded() {
        let service = service();
        let old_bus = MemoryBus::new();
        old_bus.serve_bytes(
            &node_schema_key(PREFIX),
            Bytes::from(fixtures::weather_descriptor_bytes()),
        );
        service.set_session(Some(session(&old_bus)), DEFAULT_ENDPOINT).await;
        old_bus.set_query_delay(Duration::from_millis(500));

        let (callback, _seen) = collector();
        service.watch_topic(TOPIC, DEFAULT_ENDPOINT, callback).await;
        old_bus.publish(TOPIC, fixtures::encode_current_weather(23.5, 65.0));
        tokio::task::yield_now().await;

        service.set_session(Some(session(&MemoryBus::new())), DEFAULT_ENDPOINT).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!service.registry().has_succeeded_prefix(PREFIX));
        assert_eq!(service.registry().source_count(), 0);
    }

    #[tokio::test]
    async fn discovery_waits_for_a_session() {
        let service = service();
        service.inner.kick_discovery("robot", TOPIC);
        assert!(service.inner.discovering().is_empty());
    }

    #[tokio::test]
    async fn unwatch_stops_delivery() {
        let service = service();
        let bus = MemoryBus::new();
        service.set_session(Some(session(&bus)), DEFAULT_ENDPOINT).await;
        let (callback, seen) = collector();
        let id = service.watch_topic(TOPIC, DEFAULT_ENDPOINT, callback).await;

        assert!(service.unwatch_topic(TOPIC, id, DEFAULT_ENDPOINT).await);
        assert_eq!(bus.publish(TOPIC, b"x".to_vec()), 0);
        assert!(drain(&seen).is_empty());
    }
}
