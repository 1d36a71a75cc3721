//! Runtime schema registry.
//!
//! [`SchemaRegistry`] owns zero or more independently loaded descriptor
//! pools ("sources"), discovers new ones over the bus, and decodes raw
//! payloads into JSON trees with a layered fallback:
//!
//! 1. the type name embedded in the topic (compact encoding);
//! 2. the best-scoring type guessed from the topic segments;
//! 3. brute force over every known type, filtered by content.
//!
//! # Discovery state
//!
//! Each node prefix is either untried, succeeded (terminal, never queried
//! again) or failed with a timestamp (eligible for retry once the
//! cooldown has elapsed). Success always wins over failure.
//!
//! [`SchemaRegistry::clear`] bumps a generation counter. Discovery work
//! started before a reset carries the old generation and neither loads
//! sources nor records prefix outcomes once it completes.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use prost_reflect::{DescriptorPool, DynamicMessage};
use tokio::time::Instant;

use super::decode::{DecodeResult, has_content, message_to_json};
use super::guess::best_type_for_topic;
use crate::bus::{Session, collect_replies};
use crate::config::DataplaneConfig;
use crate::domain::topic::{
    core_schema_key, extract_prefix, extract_schema_hint, node_schema_key,
    prefix_from_schema_reply_key, schema_discovery_key,
};
use crate::domain::{DataplaneEvent, EventBus};
use crate::error::DataplaneError;

/// One successfully loaded descriptor set.
#[derive(Debug, Clone)]
pub struct SchemaSource {
    /// Human-readable label reported in [`DecodeResult::source`].
    pub label: String,
    /// Independent type namespace built from the descriptor set.
    pub pool: DescriptorPool,
    fingerprint: u64,
}

impl SchemaSource {
    /// Number of decodable (non map-entry) message types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.pool
            .all_messages()
            .filter(|desc| !desc.is_map_entry())
            .count()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    generation: u64,
    /// Sources in insertion order, keyed by synthetic source key.
    sources: Vec<(String, SchemaSource)>,
    succeeded_prefixes: HashSet<String>,
    failed_prefixes: HashMap<String, Instant>,
    guess_cache: HashMap<String, Option<String>>,
}

impl RegistryState {
    fn has_fingerprint(&self, fingerprint: u64) -> bool {
        self.sources
            .iter()
            .any(|(_, source)| source.fingerprint == fingerprint)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn mark_succeeded(&mut self, prefix: &str) {
        self.failed_prefixes.remove(prefix);
        self.succeeded_prefixes.insert(prefix.to_string());
    }
}

fn fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Dynamic protobuf schema registry.
///
/// All state lives behind one mutex that is never held across a bus
/// query, so the registry can be shared through an `Arc` by the
/// subscription callbacks and the discovery tasks alike.
#[derive(Debug)]
pub struct SchemaRegistry {
    config: DataplaneConfig,
    event_bus: EventBus,
    state: Mutex<RegistryState>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: DataplaneConfig, event_bus: EventBus) -> Self {
        Self {
            config,
            event_bus,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sources_snapshot(&self) -> Vec<SchemaSource> {
        self.state()
            .sources
            .iter()
            .map(|(_, source)| source.clone())
            .collect()
    }

    /// Parses a serialized descriptor set into a new source.
    ///
    /// Returns `false` (and logs) on malformed input; a malformed blob
    /// never registers a partial namespace. Loading under an existing key
    /// replaces that source in place.
    pub fn load_descriptor(&self, bytes: &[u8], source_key: &str, label: &str) -> bool {
        self.load_descriptor_in(bytes, source_key, label, self.generation())
    }

    fn load_descriptor_in(
        &self,
        bytes: &[u8],
        source_key: &str,
        label: &str,
        generation: u64,
    ) -> bool {
        match self.try_load_descriptor(bytes, source_key, label, generation) {
            Ok(type_count) => {
                tracing::info!(source_key, label, type_count, "schema source loaded");
                let _ = self.event_bus.publish(DataplaneEvent::SchemaLoaded {
                    source_key: source_key.to_string(),
                    label: label.to_string(),
                    type_count,
                    timestamp: Utc::now(),
                });
                true
            }
            Err(err @ DataplaneError::RegistryReset(_)) => {
                tracing::debug!(source_key, error = %err, "dropping descriptor set");
                false
            }
            Err(err) => {
                tracing::warn!(source_key, error = %err, "failed to load descriptor set");
                false
            }
        }
    }

    fn try_load_descriptor(
        &self,
        bytes: &[u8],
        source_key: &str,
        label: &str,
        generation: u64,
    ) -> Result<usize, DataplaneError> {
        let pool = DescriptorPool::decode(bytes)?;
        let source = SchemaSource {
            label: label.to_string(),
            pool,
            fingerprint: fingerprint(bytes),
        };
        let type_count = source.type_count();
        if type_count == 0 {
            return Err(DataplaneError::EmptyDescriptor(source_key.to_string()));
        }

        let mut state = self.state();
        if !state.is_current(generation) {
            return Err(DataplaneError::RegistryReset(source_key.to_string()));
        }
        match state.sources.iter_mut().find(|(key, _)| key == source_key) {
            Some((_, existing)) => *existing = source,
            None => state.sources.push((source_key.to_string(), source)),
        }
        state.guess_cache.clear();
        Ok(type_count)
    }

    /// Fetches the daemon's core schemas, one query per machine or a
    /// single legacy global query when no machine is given.
    ///
    /// Returns `true` iff at least one source loaded.
    pub async fn fetch_core_schemas(
        &self,
        session: &dyn Session,
        machine_ids: Option<&[String]>,
    ) -> bool {
        let generation = self.generation();
        let keys: Vec<String> = match machine_ids {
            Some(ids) if !ids.is_empty() => {
                ids.iter().map(|id| core_schema_key(Some(id))).collect()
            }
            _ => vec![core_schema_key(None)],
        };

        let mut seen_reply_keys = HashSet::new();
        let mut loaded = false;
        for key in &keys {
            let replies =
                match collect_replies(session, key, self.config.core_query_timeout).await {
                    Ok(replies) => replies,
                    Err(err) => {
                        tracing::warn!(key_expr = %key, error = %err, "core schema query failed");
                        continue;
                    }
                };

            for reply in &replies {
                let Some(payload) = reply.non_empty_payload() else {
                    if let Err(reason) = &reply.result {
                        tracing::debug!(key_expr = %reply.key_expr, reason = %reason, "core schema reply error");
                    }
                    continue;
                };
                if !seen_reply_keys.insert(reply.key_expr.clone()) {
                    continue;
                }
                let source_key = format!("core:{}", reply.key_expr);
                let label = format!("core schemas ({})", reply.key_expr);
                loaded |= self.load_descriptor_in(payload, &source_key, &label, generation);
            }
        }
        loaded
    }

    /// Returns `true` if `prefix` failed recently enough that it must not
    /// be queried yet.
    #[must_use]
    pub fn is_prefix_in_cooldown(&self, prefix: &str) -> bool {
        self.state()
            .failed_prefixes
            .get(prefix)
            .is_some_and(|failed_at| failed_at.elapsed() < self.config.retry_cooldown)
    }

    /// Fetches the schema of a single node from `{prefix}/schema`.
    ///
    /// No query is issued for prefixes that already succeeded or that are
    /// still inside their failure cooldown.
    pub async fn fetch_node_schema(&self, session: &dyn Session, prefix: &str) -> bool {
        self.fetch_node_schema_in(session, prefix, self.generation())
            .await
    }

    async fn fetch_node_schema_in(
        &self,
        session: &dyn Session,
        prefix: &str,
        generation: u64,
    ) -> bool {
        {
            let state = self.state();
            if !state.is_current(generation) || state.succeeded_prefixes.contains(prefix) {
                return false;
            }
        }
        if self.is_prefix_in_cooldown(prefix) {
            tracing::debug!(prefix, "node schema fetch skipped, cooling down");
            return false;
        }

        let key = node_schema_key(prefix);
        let outcome = match collect_replies(session, &key, self.config.node_query_timeout).await
        {
            Ok(replies) => {
                let source_key = format!("node:{prefix}");
                let loaded = replies
                    .iter()
                    .filter_map(|reply| reply.non_empty_payload())
                    .any(|payload| {
                        self.load_descriptor_in(payload, &source_key, prefix, generation)
                    });
                if loaded {
                    Ok(())
                } else {
                    Err("no usable schema reply".to_string())
                }
            }
            Err(err) => Err(err.to_string()),
        };

        let mut state = self.state();
        if !state.is_current(generation) {
            tracing::debug!(prefix, "registry reset during node schema fetch");
            return false;
        }
        match outcome {
            Ok(()) => {
                state.mark_succeeded(prefix);
                true
            }
            Err(reason) => {
                tracing::debug!(prefix, reason = %reason, "node schema fetch failed");
                state
                    .failed_prefixes
                    .insert(prefix.to_string(), Instant::now());
                drop(state);
                let _ = self.event_bus.publish(DataplaneEvent::SchemaFetchFailed {
                    prefix: prefix.to_string(),
                    reason,
                    timestamp: Utc::now(),
                });
                false
            }
        }
    }

    /// Queries every node's schema endpoint with one wildcard query and
    /// loads each new reply as its own source.
    ///
    /// Replies are told apart by the prefix in their key when the replier
    /// answered on a concrete key, and by their index otherwise, so nodes
    /// answering on the shared wildcard key are all kept. Failed prefixes
    /// are retried regardless of cooldown. Returns the number of newly
    /// loaded sources.
    pub async fn discover_all_node_schemas(&self, session: &dyn Session) -> usize {
        self.discover_all_node_schemas_in(session, self.generation())
            .await
    }

    async fn discover_all_node_schemas_in(&self, session: &dyn Session, generation: u64) -> usize {
        if !self.state().is_current(generation) {
            return 0;
        }
        let key = schema_discovery_key();
        let replies = match collect_replies(session, &key, self.config.discovery_timeout).await {
            Ok(replies) => replies,
            Err(err) => {
                tracing::debug!(key_expr = %key, error = %err, "wildcard schema discovery failed");
                return 0;
            }
        };

        let mut batch_keys = HashSet::new();
        let mut loaded = 0;
        for (index, reply) in replies.iter().enumerate() {
            let Some(payload) = reply.non_empty_payload() else {
                continue;
            };
            let prefix = prefix_from_schema_reply_key(&reply.key_expr);

            let already_known = {
                let mut state = self.state();
                if !state.is_current(generation) {
                    tracing::debug!("registry reset during wildcard schema discovery");
                    return loaded;
                }
                let known_content = state.has_fingerprint(fingerprint(payload));
                match prefix {
                    Some(p) if state.succeeded_prefixes.contains(p) => true,
                    Some(p) if known_content => {
                        state.mark_succeeded(p);
                        true
                    }
                    _ => known_content,
                }
            };
            if already_known {
                continue;
            }

            let discriminator = match prefix {
                Some(p) if batch_keys.insert(p.to_string()) => p.to_string(),
                Some(p) => format!("{p}#{index}"),
                None => format!("{}#{index}", reply.key_expr),
            };
            let source_key = format!("node:{discriminator}");
            if self.load_descriptor_in(payload, &source_key, &discriminator, generation) {
                if let Some(p) = prefix {
                    let mut state = self.state();
                    if state.is_current(generation) {
                        state.mark_succeeded(p);
                    }
                }
                loaded += 1;
            }
        }

        tracing::debug!(replies = replies.len(), loaded, "wildcard schema discovery finished");
        loaded
    }

    /// Tries the direct per-prefix fetch for the topic, then falls back
    /// to wildcard discovery (a topic's fourth segment is often a
    /// resource name rather than the publishing node's name).
    pub async fn discover_schema_for_topic(&self, session: &dyn Session, topic: &str) -> bool {
        self.discover_schema_for_topic_in(session, topic, self.generation())
            .await
    }

    /// [`Self::discover_schema_for_topic`] on behalf of work started in
    /// `generation`; nothing is loaded if the registry has been cleared
    /// since.
    pub async fn discover_schema_for_topic_in(
        &self,
        session: &dyn Session,
        topic: &str,
        generation: u64,
    ) -> bool {
        if let Some(prefix) = extract_prefix(topic)
            && self.fetch_node_schema_in(session, &prefix, generation).await
        {
            return true;
        }
        self.discover_all_node_schemas_in(session, generation).await > 0
    }

    /// Decodes `bytes` as `type_name` using the first source that knows
    /// the type.
    #[must_use]
    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Option<DecodeResult> {
        match self.try_decode(type_name, bytes) {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::debug!(type_name, error = %err, "decode failed");
                None
            }
        }
    }

    /// Every source defining the type is tried in order; the error of the
    /// last one is returned when none of them decodes.
    fn try_decode(&self, type_name: &str, bytes: &[u8]) -> Result<DecodeResult, DataplaneError> {
        let type_name = type_name.trim_start_matches('.');
        let mut last_err = DataplaneError::TypeNotFound(type_name.to_string());
        for source in self.sources_snapshot() {
            let Some(desc) = source.pool.get_message_by_name(type_name) else {
                continue;
            };
            match DynamicMessage::decode(desc, bytes) {
                Ok(message) => {
                    return Ok(DecodeResult {
                        data: message_to_json(&message),
                        type_name: type_name.to_string(),
                        source: source.label.clone(),
                    });
                }
                Err(err) => last_err = err.into(),
            }
        }
        Err(last_err)
    }

    /// Brute-force decode against every known type, accepting the first
    /// candidate with at least one non-default field.
    #[must_use]
    pub fn try_decode_any(&self, bytes: &[u8]) -> Option<DecodeResult> {
        for source in self.sources_snapshot() {
            for desc in source.pool.all_messages() {
                if desc.is_map_entry() || desc.fields().len() == 0 {
                    continue;
                }
                let Ok(message) = DynamicMessage::decode(desc.clone(), bytes) else {
                    continue;
                };
                if has_content(&message) {
                    return Some(DecodeResult {
                        data: message_to_json(&message),
                        type_name: desc.full_name().to_string(),
                        source: source.label.clone(),
                    });
                }
            }
        }
        None
    }

    /// Decodes a sample published on `topic`: embedded schema hint first,
    /// then the guessed type, then brute force.
    #[must_use]
    pub fn try_decode_for_topic(&self, topic: &str, bytes: &[u8]) -> Option<DecodeResult> {
        if let Some(hint) = extract_schema_hint(topic)
            && let Some(result) = self.decode(&hint, bytes)
        {
            return Some(result);
        }
        if let Some(guess) = self.guess_type_for_topic(topic)
            && let Some(result) = self.decode(&guess, bytes)
        {
            return Some(result);
        }
        self.try_decode_any(bytes)
    }

    /// Best-scoring known type name for a topic, cached per topic string.
    #[must_use]
    pub fn guess_type_for_topic(&self, topic: &str) -> Option<String> {
        if let Some(cached) = self.state().guess_cache.get(topic) {
            return cached.clone();
        }

        let sources = self.sources_snapshot();
        let names: Vec<String> = sources
            .iter()
            .flat_map(|source| source.pool.all_messages())
            .filter(|desc| !desc.is_map_entry())
            .map(|desc| desc.full_name().to_string())
            .collect();
        let guess = best_type_for_topic(topic, names.iter().map(String::as_str));

        self.state()
            .guess_cache
            .insert(topic.to_string(), guess.clone());
        guess
    }

    /// Drops every source and all discovery state, and starts a new
    /// generation.
    pub fn clear(&self) {
        let mut state = self.state();
        let generation = state.generation.wrapping_add(1);
        *state = RegistryState {
            generation,
            ..RegistryState::default()
        };
        tracing::info!(generation, "schema registry cleared");
    }

    /// Current generation, bumped by every [`Self::clear`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Number of loaded sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.state().sources.len()
    }

    /// Labels of the loaded sources in insertion order.
    #[must_use]
    pub fn source_labels(&self) -> Vec<String> {
        self.state()
            .sources
            .iter()
            .map(|(_, source)| source.label.clone())
            .collect()
    }

    /// Every known fully-qualified message type name.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        self.sources_snapshot()
            .iter()
            .flat_map(|source| source.pool.all_messages())
            .filter(|desc| !desc.is_map_entry())
            .map(|desc| desc.full_name().to_string())
            .collect()
    }

    /// Returns `true` if any source defines `type_name`.
    #[must_use]
    pub fn has_type(&self, type_name: &str) -> bool {
        let type_name = type_name.trim_start_matches('.');
        self.sources_snapshot()
            .iter()
            .any(|source| source.pool.get_message_by_name(type_name).is_some())
    }

    /// Whether the schema of `prefix` has already been loaded.
    #[must_use]
    pub fn has_succeeded_prefix(&self, prefix: &str) -> bool {
        self.state().succeeded_prefixes.contains(prefix)
    }

    /// Prefixes whose schema has been loaded, sorted.
    #[must_use]
    pub fn succeeded_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.state().succeeded_prefixes.iter().cloned().collect();
        prefixes.sort();
        prefixes
    }
}
