//! Topic codec helpers.
//!
//! Two topic encodings coexist on the bus:
//!
//! - **plain**: `bubbaloop/<scope>/<machine>/<resource>/...`, no type hint;
//! - **compact**: `<domainId>/<encoded topic>/<fully.qualified.Type>/<hash>`
//!   where the encoded topic uses `%` in place of `/`
//!   (e.g. `0/bubbaloop%local%m1%camera%entrance%compressed/bubbaloop.camera.v1.CompressedImage/RIHS01_...`).
//!
//! Every helper here is pure and returns identical results for the two
//! encodings of the same logical resource.

/// Root namespace token shared by every topic of this system.
pub const ROOT_NAMESPACE: &str = "bubbaloop";

/// Last segment of a node's schema queryable.
pub const SCHEMA_SUFFIX: &str = "schema";

/// Number of leading segments that form a node prefix.
const PREFIX_SEGMENTS: usize = 4;

/// Minimum length of a bare hex hash segment.
const MIN_HEX_HASH_LEN: usize = 32;

/// Decomposed compact-form topic.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CompactTopic<'a> {
    encoded: Vec<&'a str>,
    type_name: Option<&'a str>,
}

impl CompactTopic<'_> {
    /// Decoded plain form of the topic part.
    fn logical(&self) -> String {
        let joined = self.encoded.join("/").replace('%', "/");
        joined
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Returns `true` for segments that look like a type hash.
#[must_use]
pub fn is_hash_segment(segment: &str) -> bool {
    segment.starts_with("RIHS")
        || segment == "TypeHashNotSupported"
        || (segment.len() >= MIN_HEX_HASH_LEN && segment.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Returns `true` for segments that look like a fully-qualified type name
/// such as `bubbaloop.camera.v1.CompressedImage`.
#[must_use]
pub fn is_type_name_segment(segment: &str) -> bool {
    let Some((package, name)) = segment.rsplit_once('.') else {
        return false;
    };
    !package.is_empty()
        && !package.starts_with('.')
        && name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn is_wildcard(segment: &str) -> bool {
    segment.contains('*')
}

fn parse_compact(topic: &str) -> Option<CompactTopic<'_>> {
    let segments: Vec<&str> = topic.split('/').collect();
    let (domain_id, rest) = segments.split_first()?;
    if domain_id.is_empty() || !domain_id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut rest: Vec<&str> = rest.to_vec();
    if rest.last().is_some_and(|last| is_hash_segment(last)) {
        rest.pop();
    }
    let type_name = if rest.last().is_some_and(|last| is_type_name_segment(last)) {
        rest.pop()
    } else {
        None
    };
    if rest.iter().all(|segment| segment.is_empty()) {
        return None;
    }

    Some(CompactTopic {
        encoded: rest,
        type_name,
    })
}

/// Removes trailing `*` / `**` segments.
fn strip_trailing_wildcards(topic: &str) -> &str {
    let mut trimmed = topic.trim_end_matches('/');
    loop {
        match trimmed.rsplit_once('/') {
            Some((head, "*" | "**")) => trimmed = head.trim_end_matches('/'),
            None if trimmed == "*" || trimmed == "**" => return "",
            _ => return trimmed,
        }
    }
}

/// Logical (plain-form) segments of a topic in either encoding.
fn logical_segments(topic: &str) -> Vec<String> {
    match parse_compact(topic) {
        Some(compact) => compact
            .logical()
            .split('/')
            .map(str::to_string)
            .collect(),
        None => topic
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// Extracts the type name embedded in a topic, if any.
///
/// Trailing wildcards and a trailing hash segment are skipped; the
/// remaining last segment is returned when it is a dotted type name.
#[must_use]
pub fn extract_schema_hint(topic: &str) -> Option<String> {
    let trimmed = strip_trailing_wildcards(topic);
    if let Some(type_name) = parse_compact(trimmed).and_then(|compact| compact.type_name) {
        return Some(type_name.to_string());
    }
    let mut segments = trimmed.split('/').rev().filter(|s| !s.is_empty());
    let mut candidate = segments.next()?;
    if is_hash_segment(candidate) {
        candidate = segments.next()?;
    }
    is_type_name_segment(candidate).then(|| candidate.to_string())
}

/// Returns the node prefix `root/scope/machine/node-or-resource` of a
/// topic, or `None` for foreign or too-short topics.
#[must_use]
pub fn extract_prefix(topic: &str) -> Option<String> {
    let segments = logical_segments(topic);
    if segments.first().map(String::as_str) != Some(ROOT_NAMESPACE) {
        return None;
    }
    let prefix = segments.get(..PREFIX_SEGMENTS)?;
    if prefix.iter().any(|segment| is_wildcard(segment)) {
        return None;
    }
    Some(prefix.join("/"))
}

/// Returns the machine segment of a machine-scoped topic.
///
/// Handles `bubbaloop/<scope>/<machine>/...` and the daemon form
/// `bubbaloop/<machine>/daemon/...`; legacy global topics
/// (`bubbaloop/daemon/...`) yield `None`.
#[must_use]
pub fn extract_machine_id(topic: &str) -> Option<String> {
    let segments = logical_segments(topic);
    if segments.first().map(String::as_str) != Some(ROOT_NAMESPACE) {
        return None;
    }
    let second = segments.get(1)?;
    if second == "daemon" {
        return None;
    }
    let third = segments.get(2)?;
    let machine = if third == "daemon" { second } else { third };
    (!is_wildcard(machine)).then(|| machine.clone())
}

/// Canonical base topic used as the subscription dedup key.
///
/// Strips trailing wildcards, a trailing hash and a trailing type name,
/// and decodes the compact form. Patterns that still contain a wildcard
/// after the trailing ones are removed are returned unchanged: they are
/// deliberate cross-cutting subscriptions.
#[must_use]
pub fn normalize_topic_pattern(topic: &str) -> String {
    let trimmed = strip_trailing_wildcards(topic);
    if trimmed.is_empty() || is_wildcard(trimmed) {
        return topic.to_string();
    }

    if let Some(compact) = parse_compact(trimmed) {
        return compact.logical();
    }

    let mut segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    while segments
        .last()
        .is_some_and(|last| is_hash_segment(last) || is_type_name_segment(last))
        && segments.len() > 1
    {
        segments.pop();
    }
    segments.join("/")
}

/// Key expression to declare on the bus for a subscription to `topic`.
///
/// Without `exact_match` this is the normalized topic with a `/**`
/// suffix, so one bus subscriber covers every type/hash variant published
/// under it. Subscriptions given in the compact form therefore map to the
/// same key as their plain form.
#[must_use]
pub fn subscription_key_expr(topic: &str, exact_match: bool) -> String {
    if exact_match {
        return topic.to_string();
    }
    let trimmed = strip_trailing_wildcards(topic);
    if trimmed.is_empty() || is_wildcard(trimmed) {
        return topic.to_string();
    }
    format!("{}/**", normalize_topic_pattern(trimmed))
}

/// Returns `true` if a concrete key seen on the bus belongs to a topic a
/// listener subscribed to, comparing display names across encodings.
#[must_use]
pub fn display_name_matches(observed: &str, subscribed: &str) -> bool {
    let observed = normalize_topic_pattern(observed);
    let subscribed = normalize_topic_pattern(subscribed);
    observed == subscribed
        || observed
            .strip_prefix(subscribed.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Schema queryable key of a node prefix.
#[must_use]
pub fn node_schema_key(prefix: &str) -> String {
    format!("{prefix}/{SCHEMA_SUFFIX}")
}

/// Daemon core-schema queryable key, machine-scoped or legacy global.
#[must_use]
pub fn core_schema_key(machine_id: Option<&str>) -> String {
    match machine_id {
        Some(machine) => format!("{ROOT_NAMESPACE}/{machine}/daemon/api/schemas"),
        None => format!("{ROOT_NAMESPACE}/daemon/api/schemas"),
    }
}

/// Wildcard matching every node's schema queryable.
#[must_use]
pub fn schema_discovery_key() -> String {
    format!("{ROOT_NAMESPACE}/**/{SCHEMA_SUFFIX}")
}

/// Node prefix a schema reply was sent from, when the reply key is
/// concrete (`<prefix>/schema` without wildcards).
#[must_use]
pub fn prefix_from_schema_reply_key(key_expr: &str) -> Option<&str> {
    let prefix = key_expr.strip_suffix(SCHEMA_SUFFIX)?.strip_suffix('/')?;
    (!prefix.is_empty() && !is_wildcard(prefix)).then_some(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str =
        "RIHS01_5f3a0c1e2b4d6f8091a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f7081";
    const PLAIN: &str = "bubbaloop/local/nvidia_orin00/camera/entrance/compressed";

    fn compact() -> String {
        format!(
            "0/bubbaloop%local%nvidia_orin00%camera%entrance%compressed/bubbaloop.camera.v1.CompressedImage/{HASH}"
        )
    }

    #[test]
    fn prefix_is_identical_across_encodings() {
        let expected = Some("bubbaloop/local/nvidia_orin00/camera".to_string());
        assert_eq!(extract_prefix(PLAIN), expected);
        assert_eq!(extract_prefix(&compact()), expected);
    }

    #[test]
    fn machine_id_is_identical_across_encodings() {
        let expected = Some("nvidia_orin00".to_string());
        assert_eq!(extract_machine_id(PLAIN), expected);
        assert_eq!(extract_machine_id(&compact()), expected);
    }

    #[test]
    fn normalization_is_identical_across_encodings() {
        assert_eq!(normalize_topic_pattern(PLAIN), PLAIN);
        assert_eq!(normalize_topic_pattern(&compact()), PLAIN);
        assert_eq!(normalize_topic_pattern(&format!("{PLAIN}/**")), PLAIN);
    }

    #[test]
    fn normalization_is_idempotent() {
        for topic in [
            PLAIN.to_string(),
            compact(),
            format!("{PLAIN}/bubbaloop.camera.v1.CompressedImage/{HASH}"),
            "bubbaloop/local/m1/weather/current/*".to_string(),
            "**/bubbaloop.camera.v1.CompressedImage/*".to_string(),
        ] {
            let once = normalize_topic_pattern(&topic);
            assert_eq!(normalize_topic_pattern(&once), once, "topic {topic}");
        }
    }

    #[test]
    fn normalization_strips_plain_type_and_hash() {
        let topic = format!("{PLAIN}/bubbaloop.camera.v1.CompressedImage/{HASH}");
        assert_eq!(normalize_topic_pattern(&topic), PLAIN);
    }

    #[test]
    fn cross_cutting_wildcards_are_untouched() {
        let pattern = "**/bubbaloop.camera.v1.CompressedImage/*";
        assert_eq!(normalize_topic_pattern(pattern), pattern);
        assert_eq!(normalize_topic_pattern("**"), "**");
        assert_eq!(normalize_topic_pattern("bubbaloop/*/m1/camera"), "bubbaloop/*/m1/camera");
    }

    #[test]
    fn dotted_resource_names_are_kept() {
        let topic = "bubbaloop/local/m1/files/report.pdf";
        assert_eq!(normalize_topic_pattern(topic), topic);
        assert_eq!(extract_schema_hint(topic), None);
    }

    #[test]
    fn schema_hint_from_compact_topic() {
        assert_eq!(
            extract_schema_hint(&compact()),
            Some("bubbaloop.camera.v1.CompressedImage".to_string())
        );
        assert_eq!(
            extract_schema_hint("0/weather%current/weather.v1.CurrentWeather"),
            Some("weather.v1.CurrentWeather".to_string())
        );
        assert_eq!(extract_schema_hint(PLAIN), None);
    }

    #[test]
    fn prefix_rejects_foreign_and_short_topics() {
        assert_eq!(extract_prefix("other/local/m1/camera/x"), None);
        assert_eq!(extract_prefix("bubbaloop/local/m1"), None);
        assert_eq!(extract_prefix("bubbaloop/**/schema"), None);
    }

    #[test]
    fn machine_id_for_daemon_topics() {
        assert_eq!(
            extract_machine_id("bubbaloop/jetson_01/daemon/api/schemas"),
            Some("jetson_01".to_string())
        );
        assert_eq!(extract_machine_id("bubbaloop/daemon/api/schemas"), None);
        assert_eq!(extract_machine_id("bubbaloop/local"), None);
    }

    #[test]
    fn subscription_key_is_built_from_normalized_topic() {
        assert_eq!(subscription_key_expr(PLAIN, false), format!("{PLAIN}/**"));
        assert_eq!(subscription_key_expr(&format!("{PLAIN}/**"), false), format!("{PLAIN}/**"));
        assert_eq!(subscription_key_expr(&compact(), false), format!("{PLAIN}/**"));
        assert_eq!(subscription_key_expr(PLAIN, true), PLAIN);
        assert_eq!(subscription_key_expr("**/schema", false), "**/schema");
    }

    #[test]
    fn display_names_match_across_encodings() {
        assert!(display_name_matches(&compact(), PLAIN));
        assert!(display_name_matches(&compact(), "bubbaloop/local/nvidia_orin00/camera"));
        assert!(!display_name_matches(&compact(), "bubbaloop/local/nvidia_orin00/cam"));
    }

    #[test]
    fn schema_keys() {
        assert_eq!(
            node_schema_key("bubbaloop/local/m1/weather"),
            "bubbaloop/local/m1/weather/schema"
        );
        assert_eq!(core_schema_key(Some("m1")), "bubbaloop/m1/daemon/api/schemas");
        assert_eq!(core_schema_key(None), "bubbaloop/daemon/api/schemas");
        assert_eq!(schema_discovery_key(), "bubbaloop/**/schema");
        assert_eq!(
            prefix_from_schema_reply_key("bubbaloop/local/m1/weather/schema"),
            Some("bubbaloop/local/m1/weather")
        );
        assert_eq!(prefix_from_schema_reply_key("bubbaloop/**/schema"), None);
    }
}
