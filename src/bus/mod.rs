//! Transport seam: the opaque session the data-plane runs on.
//!
//! The messaging substrate supplies a [`Session`] offering two
//! primitives: a request/reply `query` (used to fetch schemas) and a
//! `declare_subscriber` for pub/sub delivery. Everything above this module
//! only ever sees the trait, so the registry and manager are testable
//! against the in-process [`MemoryBus`].

pub mod key_expr;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

use crate::error::DataplaneError;

pub use key_expr::key_expr_intersects;
pub use memory::MemoryBus;

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Concrete key the message was published under.
    pub key_expr: String,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Reception timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// Builds a sample stamped with the current time.
    #[must_use]
    pub fn new(key_expr: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            key_expr: key_expr.into(),
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One reply to a [`Session::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReply {
    /// Key the replier answered on. Repliers that echo the query key
    /// return the (possibly wildcard) query expression here.
    pub key_expr: String,
    /// Payload, or the error text the replier sent back.
    pub result: Result<Bytes, String>,
}

impl QueryReply {
    /// Returns the payload if the reply succeeded and carried data.
    #[must_use]
    pub fn non_empty_payload(&self) -> Option<&Bytes> {
        self.result.as_ref().ok().filter(|payload| !payload.is_empty())
    }
}

/// Callback invoked for every sample matching a subscriber.
pub type SampleHandler = Arc<dyn Fn(Sample) + Send + Sync>;

/// Opaque connection to the bus.
pub trait Session: Send + Sync + fmt::Debug {
    /// Issues a query and streams back every reply received before
    /// `timeout`. Transport failures surface as `Err` replies.
    fn query(&self, key_expr: &str, timeout: Duration) -> BoxStream<'static, QueryReply>;

    /// Declares a subscriber for `key_expr`.
    ///
    /// # Errors
    ///
    /// Returns [`DataplaneError::Transport`] if the bus refuses the
    /// declaration.
    fn declare_subscriber(
        &self,
        key_expr: &str,
        handler: SampleHandler,
    ) -> BoxFuture<'static, Result<Box<dyn SubscriberHandle>, DataplaneError>>;
}

/// A live bus-level subscription.
pub trait SubscriberHandle: Send + Sync + fmt::Debug {
    /// Key expression the subscriber was declared on.
    fn key_expr(&self) -> &str;

    /// Tears the subscription down.
    ///
    /// # Errors
    ///
    /// Returns [`DataplaneError::Transport`] if the bus reports a failure;
    /// the handle is consumed regardless.
    fn undeclare(self: Box<Self>) -> BoxFuture<'static, Result<(), DataplaneError>>;
}

/// Collects replies for `key_expr` until the stream ends or `timeout`
/// elapses.
///
/// Replies that arrived before the deadline are kept even when the
/// deadline cuts the stream short.
///
/// # Errors
///
/// Returns [`DataplaneError::QueryTimeout`] if the deadline elapsed with
/// no reply at all.
pub async fn collect_replies(
    session: &dyn Session,
    key_expr: &str,
    timeout: Duration,
) -> Result<Vec<QueryReply>, DataplaneError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut stream = session.query(key_expr, timeout);
    let mut replies = Vec::new();

    loop {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(reply)) => replies.push(reply),
            Ok(None) => break,
            Err(_) if replies.is_empty() => {
                return Err(DataplaneError::QueryTimeout {
                    key_expr: key_expr.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            Err(_) => {
                tracing::debug!(key_expr, received = replies.len(), "query deadline reached");
                break;
            }
        }
    }

    Ok(replies)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_not_returned() {
        let reply = QueryReply {
            key_expr: "a/schema".to_string(),
            result: Ok(Bytes::new()),
        };
        assert!(reply.non_empty_payload().is_none());

        let failed = QueryReply {
            key_expr: "a/schema".to_string(),
            result: Err("no route".to_string()),
        };
        assert!(failed.non_empty_payload().is_none());
    }

    #[tokio::test]
    async fn collect_replies_gathers_all_queryables() {
        let bus = MemoryBus::new();
        bus.serve_bytes("bubbaloop/local/m1/a/schema", Bytes::from_static(b"a"));
        bus.serve_bytes("bubbaloop/local/m1/b/schema", Bytes::from_static(b"b"));

        let Ok(replies) =
            collect_replies(&bus, "bubbaloop/**/schema", Duration::from_secs(1)).await
        else {
            panic!("query should succeed");
        };
        assert_eq!(replies.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_replies_times_out_without_replies() {
        let bus = MemoryBus::new();
        bus.serve_bytes("slow/schema", Bytes::from_static(b"x"));
        bus.set_query_delay(Duration::from_secs(10));

        let result = collect_replies(&bus, "slow/schema", Duration::from_secs(3)).await;
        let Err(DataplaneError::QueryTimeout { timeout_ms, .. }) = result else {
            panic!("expected timeout");
        };
        assert_eq!(timeout_ms, 3000);
    }
}
