//! Broadcast channel for data-plane events.
//!
//! The schema registry and the subscription manager share one
//! [`EventBus`] and report schema loads, handle lifecycle changes and
//! stats ticks through it. A UI layer subscribes once and reacts without
//! polling either component.

use tokio::sync::broadcast;

use super::DataplaneEvent;

/// Broadcast bus for [`DataplaneEvent`]s.
///
/// Publishing never blocks the decode or drive paths: with no receiver
/// the event is dropped, and a receiver that falls more than `capacity`
/// events behind loses the oldest ones (`RecvError::Lagged`).
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DataplaneEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per receiver
    /// (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes `event`, returning how many receivers got it.
    pub fn publish(&self, event: DataplaneEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(event_type = event.event_type_str(), "no event receivers");
                0
            }
        }
    }

    /// Receiver for every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DataplaneEvent> {
        self.sender.subscribe()
    }
}
