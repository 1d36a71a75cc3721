//! Listener handle.
//!
//! [`ListenerId`] is minted by the subscription manager for every
//! registered callback and is all a consumer needs to unsubscribe. The
//! bus-level handles stay inside the manager.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one listener on one topic subscription.
///
/// Random (UUID v4), so ids handed out on different endpoints or after a
/// reconnect never collide. Serializes as a bare string for the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(uuid::Uuid);

impl ListenerId {
    /// Mints a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn listeners_on_one_topic_get_distinct_ids() {
        let ids: HashSet<ListenerId> = (0..64).map(|_| ListenerId::new()).collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn ui_round_trip_preserves_the_id() {
        let id = ListenerId::new();
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{id}\""));
        let back: Option<ListenerId> = serde_json::from_str(&json).ok();
        assert_eq!(back, Some(id));
    }
}
