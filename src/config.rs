//! Data-plane configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Every key has a default, so
//! [`DataplaneConfig::default`] is a fully usable configuration.

use std::time::Duration;

use crate::error::DataplaneError;

/// Top-level data-plane configuration.
///
/// Loaded once at startup via [`DataplaneConfig::from_env`] and handed to
/// the [`crate::schema::SchemaRegistry`] and
/// [`crate::subscription::SubscriptionManager`] constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataplaneConfig {
    /// Timeout for a single node's `{prefix}/schema` query.
    pub node_query_timeout: Duration,

    /// Timeout for the batched `<root>/**/schema` wildcard query.
    pub discovery_timeout: Duration,

    /// Timeout for the daemon's core schema query.
    pub core_query_timeout: Duration,

    /// Minimum delay before a failed prefix may be queried again.
    pub retry_cooldown: Duration,

    /// Sliding window used for the per-topic rate computation.
    pub hz_window: Duration,

    /// Number of message timestamps retained per topic.
    pub hz_buffer_size: usize,

    /// Interval between stats snapshots published by the ticker.
    pub stats_interval: Duration,

    /// Capacity of the [`crate::domain::EventBus`] broadcast channel.
    pub event_bus_capacity: usize,

    /// Machines whose daemons should be asked for core schemas. Empty
    /// means a single legacy global query.
    pub machine_ids: Vec<String>,
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            node_query_timeout: Duration::from_millis(3_000),
            discovery_timeout: Duration::from_millis(5_000),
            core_query_timeout: Duration::from_millis(5_000),
            retry_cooldown: Duration::from_millis(10_000),
            hz_window: Duration::from_millis(2_000),
            hz_buffer_size: 100,
            stats_interval: Duration::from_millis(1_000),
            event_bus_capacity: 1_024,
            machine_ids: Vec::new(),
        }
    }
}

impl DataplaneConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set or
    /// cannot be parsed. Calls `dotenvy::dotenv().ok()` to optionally load
    /// a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`DataplaneError::Config`] if the ring buffer size is zero
    /// or a configured machine id contains `/` or wildcards.
    pub fn from_env() -> Result<Self, DataplaneError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let hz_buffer_size = parse_env("DATAPLANE_HZ_BUFFER_SIZE", defaults.hz_buffer_size);
        if hz_buffer_size == 0 {
            return Err(DataplaneError::Config(
                "DATAPLANE_HZ_BUFFER_SIZE must be positive".to_string(),
            ));
        }

        let machine_ids = std::env::var("DATAPLANE_MACHINE_IDS")
            .map(|raw| parse_machine_ids(&raw))
            .unwrap_or_default();
        if let Some(bad) = machine_ids
            .iter()
            .find(|id| id.contains('/') || id.contains('*'))
        {
            return Err(DataplaneError::Config(format!("invalid machine id: {bad:?}")));
        }

        Ok(Self {
            node_query_timeout: parse_env_ms(
                "DATAPLANE_NODE_QUERY_TIMEOUT_MS",
                defaults.node_query_timeout,
            ),
            discovery_timeout: parse_env_ms(
                "DATAPLANE_DISCOVERY_TIMEOUT_MS",
                defaults.discovery_timeout,
            ),
            core_query_timeout: parse_env_ms(
                "DATAPLANE_CORE_QUERY_TIMEOUT_MS",
                defaults.core_query_timeout,
            ),
            retry_cooldown: parse_env_ms("DATAPLANE_RETRY_COOLDOWN_MS", defaults.retry_cooldown),
            hz_window: parse_env_ms("DATAPLANE_HZ_WINDOW_MS", defaults.hz_window),
            hz_buffer_size,
            stats_interval: parse_env_ms("DATAPLANE_STATS_INTERVAL_MS", defaults.stats_interval),
            event_bus_capacity: parse_env(
                "DATAPLANE_EVENT_BUS_CAPACITY",
                defaults.event_bus_capacity,
            ),
            machine_ids,
        })
    }
}

/// Splits a comma-separated machine list, trimming blanks and applying
/// the hyphen-to-underscore sanitisation nodes use in their topics.
fn parse_machine_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.replace('-', "_"))
        .collect()
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable holding milliseconds.
fn parse_env_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DataplaneConfig::default();
        assert_eq!(config.retry_cooldown, Duration::from_secs(10));
        assert_eq!(config.hz_window, Duration::from_secs(2));
        assert_eq!(config.hz_buffer_size, 100);
        assert!(config.machine_ids.is_empty());
    }

    #[test]
    fn machine_ids_are_trimmed_and_sanitised() {
        let ids = parse_machine_ids(" jetson-orin ,, nvidia_orin00,");
        assert_eq!(ids, vec!["jetson_orin".to_string(), "nvidia_orin00".to_string()]);
    }

    #[test]
    fn unparsable_values_fall_back_to_default() {
        let value = parse_env_ms("DATAPLANE_TEST_UNSET_KEY_FOR_CONFIG", Duration::from_millis(7));
        assert_eq!(value, Duration::from_millis(7));
        let count: usize = parse_env("DATAPLANE_TEST_UNSET_KEY_FOR_CONFIG", 3);
        assert_eq!(count, 3);
    }
}
