//! In-process bus.
//!
//! [`MemoryBus`] implements [`Session`] entirely in memory: publishes are
//! delivered synchronously to every intersecting subscriber, and queries
//! are answered by registered queryables. It backs the test suite and the
//! demo binary, and exposes counters plus fault injection so subscription
//! races can be driven deterministically.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};

use super::{QueryReply, Sample, SampleHandler, Session, SubscriberHandle, key_expr_intersects};
use crate::error::DataplaneError;

/// Computes the reply to a query. Receives the query key expression.
pub type Responder = Arc<dyn Fn(&str) -> Option<QueryReply> + Send + Sync>;

struct SubscriberEntry {
    key_expr: String,
    handler: SampleHandler,
}

struct QueryableEntry {
    key_expr: String,
    responder: Responder,
}

#[derive(Default)]
struct MemoryBusInner {
    subscribers: Mutex<HashMap<u64, SubscriberEntry>>,
    queryables: Mutex<HashMap<u64, QueryableEntry>>,
    query_log: Mutex<Vec<String>>,
    next_id: AtomicU64,
    pending_declare_failures: AtomicUsize,
    declare_count: AtomicUsize,
    undeclare_count: AtomicUsize,
    query_delay: Mutex<Duration>,
    declare_delay: Mutex<Duration>,
    undeclare_delay: Mutex<Duration>,
}

impl MemoryBusInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, SubscriberEntry>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queryables(&self) -> MutexGuard<'_, HashMap<u64, QueryableEntry>> {
        self.queryables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delay(slot: &Mutex<Duration>) -> Duration {
        *slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`Session`] implementation.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<MemoryBusInner>,
}

impl fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBus")
            .field("subscribers", &self.subscriber_count())
            .field("queryables", &self.inner.queryables().len())
            .finish()
    }
}

impl MemoryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `payload` under `key_expr`, returning how many
    /// subscribers received it.
    pub fn publish(&self, key_expr: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let handlers: Vec<SampleHandler> = self
            .inner
            .subscribers()
            .values()
            .filter(|entry| key_expr_intersects(&entry.key_expr, key_expr))
            .map(|entry| Arc::clone(&entry.handler))
            .collect();

        for handler in &handlers {
            handler(Sample::new(key_expr, payload.clone()));
        }
        handlers.len()
    }

    /// Registers a queryable answering with a custom responder.
    pub fn declare_queryable(&self, key_expr: &str, responder: Responder) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.queryables().insert(
            id,
            QueryableEntry {
                key_expr: key_expr.to_string(),
                responder,
            },
        );
        id
    }

    /// Serves a fixed payload, replying on the queryable's own key.
    pub fn serve_bytes(&self, key_expr: &str, payload: Bytes) -> u64 {
        let reply_key = key_expr.to_string();
        self.declare_queryable(
            key_expr,
            Arc::new(move |_query: &str| {
                Some(QueryReply {
                    key_expr: reply_key.clone(),
                    result: Ok(payload.clone()),
                })
            }),
        )
    }

    /// Serves a fixed payload, replying on the query's key expression the
    /// way node schema queryables do. Wildcard queries therefore receive
    /// replies that all carry the same wildcard key.
    pub fn serve_bytes_on_query_key(&self, key_expr: &str, payload: Bytes) -> u64 {
        self.declare_queryable(
            key_expr,
            Arc::new(move |query: &str| {
                Some(QueryReply {
                    key_expr: query.to_string(),
                    result: Ok(payload.clone()),
                })
            }),
        )
    }

    /// Makes the next `count` subscriber declarations fail.
    pub fn fail_next_declares(&self, count: usize) {
        self.inner
            .pending_declare_failures
            .store(count, Ordering::SeqCst);
    }

    /// Delays every query reply stream by `delay`.
    pub fn set_query_delay(&self, delay: Duration) {
        *self
            .inner
            .query_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Delays every subscriber declaration by `delay`.
    pub fn set_declare_delay(&self, delay: Duration) {
        *self
            .inner
            .declare_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Delays every subscriber teardown by `delay`.
    pub fn set_undeclare_delay(&self, delay: Duration) {
        *self
            .inner
            .undeclare_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }

    /// Number of live subscribers declared on exactly `key_expr`.
    #[must_use]
    pub fn subscriber_count_for(&self, key_expr: &str) -> usize {
        self.inner
            .subscribers()
            .values()
            .filter(|entry| entry.key_expr == key_expr)
            .count()
    }

    /// Key expressions of all live subscribers, sorted.
    #[must_use]
    pub fn subscriber_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .subscribers()
            .values()
            .map(|entry| entry.key_expr.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Total successful subscriber declarations.
    #[must_use]
    pub fn declare_count(&self) -> usize {
        self.inner.declare_count.load(Ordering::SeqCst)
    }

    /// Total subscriber teardowns.
    #[must_use]
    pub fn undeclare_count(&self) -> usize {
        self.inner.undeclare_count.load(Ordering::SeqCst)
    }

    /// Every key expression queried so far, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.inner
            .query_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of queries issued for exactly `key_expr`.
    #[must_use]
    pub fn query_count(&self, key_expr: &str) -> usize {
        self.queries().iter().filter(|q| q.as_str() == key_expr).count()
    }
}

impl Session for MemoryBus {
    fn query(&self, key_expr: &str, _timeout: Duration) -> BoxStream<'static, QueryReply> {
        self.inner
            .query_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key_expr.to_string());

        let responders: Vec<Responder> = self
            .inner
            .queryables()
            .values()
            .filter(|entry| key_expr_intersects(&entry.key_expr, key_expr))
            .map(|entry| Arc::clone(&entry.responder))
            .collect();
        let replies: Vec<QueryReply> = responders
            .iter()
            .filter_map(|responder| responder(key_expr))
            .collect();

        let delay = MemoryBusInner::delay(&self.inner.query_delay);
        stream::once(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            stream::iter(replies)
        })
        .flatten()
        .boxed()
    }

    fn declare_subscriber(
        &self,
        key_expr: &str,
        handler: SampleHandler,
    ) -> BoxFuture<'static, Result<Box<dyn SubscriberHandle>, DataplaneError>> {
        let inner = Arc::clone(&self.inner);
        let key_expr = key_expr.to_string();
        Box::pin(async move {
            let delay = MemoryBusInner::delay(&inner.declare_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let should_fail = inner
                .pending_declare_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(DataplaneError::Transport(format!(
                    "declare refused for {key_expr}"
                )));
            }

            let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
            inner.subscribers().insert(
                id,
                SubscriberEntry {
                    key_expr: key_expr.clone(),
                    handler,
                },
            );
            inner.declare_count.fetch_add(1, Ordering::SeqCst);

            let handle: Box<dyn SubscriberHandle> = Box::new(MemorySubscriber {
                inner,
                id,
                key_expr,
            });
            Ok(handle)
        })
    }
}

/// Handle returned by [`MemoryBus::declare_subscriber`].
pub struct MemorySubscriber {
    inner: Arc<MemoryBusInner>,
    id: u64,
    key_expr: String,
}

impl fmt::Debug for MemorySubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySubscriber")
            .field("id", &self.id)
            .field("key_expr", &self.key_expr)
            .finish()
    }
}

impl SubscriberHandle for MemorySubscriber {
    fn key_expr(&self) -> &str {
        &self.key_expr
    }

    fn undeclare(self: Box<Self>) -> BoxFuture<'static, Result<(), DataplaneError>> {
        Box::pin(async move {
            let delay = MemoryBusInner::delay(&self.inner.undeclare_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.inner.subscribers().remove(&self.id);
            self.inner.undeclare_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> SampleHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_sample| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscribers_only() {
        let bus = MemoryBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let Ok(_handle) = bus
            .declare_subscriber("bubbaloop/local/m1/weather/**", counting_handler(&hits))
            .await
        else {
            panic!("declare failed");
        };

        assert_eq!(bus.publish("bubbaloop/local/m1/weather/current", b"x".to_vec()), 1);
        assert_eq!(bus.publish("bubbaloop/local/m1/camera/front", b"x".to_vec()), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undeclare_stops_delivery() {
        let bus = MemoryBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let Ok(handle) = bus.declare_subscriber("a/**", counting_handler(&hits)).await else {
            panic!("declare failed");
        };
        assert_eq!(bus.subscriber_count(), 1);

        let undeclared = handle.undeclare().await;
        assert!(undeclared.is_ok());
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish("a/b", b"x".to_vec()), 0);
        assert_eq!(bus.undeclare_count(), 1);
    }

    #[tokio::test]
    async fn injected_declare_failure_is_consumed() {
        let bus = MemoryBus::new();
        bus.fail_next_declares(1);
        let hits = Arc::new(AtomicUsize::new(0));

        let first = bus.declare_subscriber("a", counting_handler(&hits)).await;
        assert!(first.is_err());
        let second = bus.declare_subscriber("a", counting_handler(&hits)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn query_echoing_replier_returns_query_key() {
        let bus = MemoryBus::new();
        bus.serve_bytes_on_query_key("bubbaloop/local/m1/a/schema", Bytes::from_static(b"a"));
        let replies: Vec<QueryReply> = bus
            .query("bubbaloop/**/schema", Duration::from_secs(1))
            .collect()
            .await;
        assert_eq!(replies.len(), 1);
        let Some(reply) = replies.first() else {
            panic!("missing reply");
        };
        assert_eq!(reply.key_expr, "bubbaloop/**/schema");
        assert_eq!(bus.query_count("bubbaloop/**/schema"), 1);
    }
}
