//! Per-topic throughput accounting.
//!
//! A [`RateTracker`] keeps the total message count, the wall-clock time of
//! the last message and a bounded ring of monotonic arrival instants. The
//! rate is computed on demand as `arrivals in window / window seconds`.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Snapshot of a listened topic's throughput.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStats {
    /// Messages received since the subscription entry was created.
    pub message_count: u64,
    /// Messages per second over the sliding window.
    pub hz: f64,
    /// Reception time of the most recent message.
    pub last_seen: Option<DateTime<Utc>>,
    /// Listeners currently registered on the topic.
    pub listener_count: usize,
}

impl TopicStats {
    /// Folds another subscription's figures on the same topic into this
    /// snapshot, as when a topic is listened both normally and verbatim.
    pub fn absorb(&mut self, other: &Self) {
        self.message_count += other.message_count;
        self.hz += other.hz;
        self.last_seen = self.last_seen.max(other.last_seen);
        self.listener_count += other.listener_count;
    }
}

/// Snapshot of a key observed by the bus-wide monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredTopicStats {
    /// Messages seen on this concrete key since monitoring started.
    pub message_count: u64,
    /// Messages per second over the sliding window.
    pub hz: f64,
    /// Reception time of the most recent message.
    pub last_seen: Option<DateTime<Utc>>,
    /// Whether a per-topic subscription with listeners covers this key.
    pub listened: bool,
}

/// Message counter with a fixed-size arrival ring.
#[derive(Debug, Clone)]
pub struct RateTracker {
    message_count: u64,
    last_seen: Option<DateTime<Utc>>,
    arrivals: VecDeque<Instant>,
    capacity: usize,
    window: Duration,
}

impl RateTracker {
    /// Creates a tracker retaining at most `capacity` arrivals.
    #[must_use]
    pub fn new(capacity: usize, window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            message_count: 0,
            last_seen: None,
            arrivals: VecDeque::with_capacity(capacity),
            capacity,
            window,
        }
    }

    /// Records one message received at `seen`.
    pub fn record(&mut self, seen: DateTime<Utc>) {
        self.message_count = self.message_count.saturating_add(1);
        self.last_seen = Some(seen);
        if self.arrivals.len() == self.capacity {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(Instant::now());
    }

    /// Total messages recorded.
    #[must_use]
    pub const fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Reception time of the last message.
    #[must_use]
    pub const fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Current rate in messages per second.
    #[must_use]
    pub fn hz(&self) -> f64 {
        let window_secs = self.window.as_secs_f64();
        if window_secs <= 0.0 {
            return 0.0;
        }
        let now = Instant::now();
        let in_window = self
            .arrivals
            .iter()
            .rev()
            .take_while(|arrival| now.duration_since(**arrival) <= self.window)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let in_window = in_window as f64;
        in_window / window_secs
    }

    /// Builds the serializable snapshot for a listened topic.
    #[must_use]
    pub fn topic_stats(&self, listener_count: usize) -> TopicStats {
        TopicStats {
            message_count: self.message_count,
            hz: self.hz(),
            last_seen: self.last_seen,
            listener_count,
        }
    }

    /// Builds the serializable snapshot for a monitored key.
    #[must_use]
    pub fn monitored_stats(&self, listened: bool) -> MonitoredTopicStats {
        MonitoredTopicStats {
            message_count: self.message_count,
            hz: self.hz(),
            last_seen: self.last_seen,
            listened,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rate_counts_only_the_window() {
        let mut tracker = RateTracker::new(100, Duration::from_secs(2));
        for _ in 0..4 {
            tracker.record(Utc::now());
        }
        assert!((tracker.hz() - 2.0).abs() < f64::EPSILON);

        tokio::time::advance(Duration::from_millis(2_500)).await;
        tracker.record(Utc::now());
        assert!((tracker.hz() - 0.5).abs() < f64::EPSILON);
        assert_eq!(tracker.message_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn ring_is_bounded() {
        let mut tracker = RateTracker::new(3, Duration::from_secs(2));
        for _ in 0..10 {
            tracker.record(Utc::now());
        }
        assert_eq!(tracker.message_count(), 10);
        assert!((tracker.hz() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_tracker_reports_zero() {
        let tracker = RateTracker::new(100, Duration::from_secs(2));
        let stats = tracker.topic_stats(2);
        assert_eq!(stats.message_count, 0);
        assert!(stats.hz.abs() < f64::EPSILON);
        assert_eq!(stats.last_seen, None);
        assert_eq!(stats.listener_count, 2);
    }
}
