//! Dynamic message rendering.
//!
//! Converts a reflectively decoded [`DynamicMessage`] into a
//! `serde_json::Value` tree for the rendering layer:
//!
//! - field names become lower camel case (`machine_id` -> `machineId`,
//!   `wind_speed_10m` -> `windSpeed_10m`);
//! - 64-bit integers become decimal strings, bytes become base64 strings;
//! - enums render as their symbolic name;
//! - `__proto__`, `constructor` and `prototype` keys are never emitted.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MapKey, ReflectMessage, Value};
use serde::Serialize;
use serde_json::{Map, Number, Value as JsonValue};

/// Keys that must never reach a consumer's object tree.
const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeResult {
    /// Decoded message as a JSON object tree.
    pub data: JsonValue,
    /// Fully-qualified protobuf type name used for decoding.
    pub type_name: String,
    /// Label of the schema source that supplied the type.
    pub source: String,
}

fn is_forbidden_key(key: &str) -> bool {
    FORBIDDEN_KEYS.contains(&key)
}

/// Converts a snake_case field name to lower camel case.
///
/// An underscore followed by a lowercase ASCII letter is replaced by the
/// uppercase letter; every other underscore is kept.
#[must_use]
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_'
            && let Some(next) = chars.peek().copied()
            && next.is_ascii_lowercase()
        {
            out.push(next.to_ascii_uppercase());
            chars.next();
            continue;
        }
        out.push(c);
    }
    out
}

fn is_singular_message(field: &FieldDescriptor) -> bool {
    !field.is_list() && !field.is_map() && matches!(field.kind(), Kind::Message(_))
}

/// Renders a message as a JSON object with camelCase keys.
#[must_use]
pub fn message_to_json(message: &DynamicMessage) -> JsonValue {
    let mut object = Map::new();
    for field in message.descriptor().fields() {
        let name = field.name();
        if is_forbidden_key(name) {
            continue;
        }
        let present = message.has_field(&field);
        if field.containing_oneof().is_some() && !present {
            continue;
        }

        let key = to_camel_case(name);
        if is_forbidden_key(&key) {
            continue;
        }

        let value = if is_singular_message(&field) && !present {
            JsonValue::Null
        } else {
            value_to_json(&message.get_field(&field), &field.kind())
        };
        object.insert(key, value);
    }
    JsonValue::Object(object)
}

fn value_to_json(value: &Value, kind: &Kind) -> JsonValue {
    match value {
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::I32(n) => JsonValue::from(*n),
        Value::U32(n) => JsonValue::from(*n),
        Value::I64(n) => JsonValue::String(n.to_string()),
        Value::U64(n) => JsonValue::String(n.to_string()),
        Value::F32(f) => float_to_json(f64::from(*f)),
        Value::F64(f) => float_to_json(*f),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
        Value::EnumNumber(n) => enum_to_json(*n, kind),
        Value::Message(m) => message_to_json(m),
        Value::List(items) => {
            JsonValue::Array(items.iter().map(|item| value_to_json(item, kind)).collect())
        }
        Value::Map(entries) => {
            let value_kind = match kind {
                Kind::Message(entry) => entry.map_entry_value_field().kind(),
                other => other.clone(),
            };
            let mut object = Map::new();
            for (key, entry_value) in entries {
                let key = map_key_to_string(key);
                if is_forbidden_key(&key) {
                    continue;
                }
                object.insert(key, value_to_json(entry_value, &value_kind));
            }
            JsonValue::Object(object)
        }
    }
}

fn map_key_to_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(b) => b.to_string(),
        MapKey::I32(n) => n.to_string(),
        MapKey::I64(n) => n.to_string(),
        MapKey::U32(n) => n.to_string(),
        MapKey::U64(n) => n.to_string(),
        MapKey::String(s) => s.clone(),
    }
}

fn float_to_json(value: f64) -> JsonValue {
    Number::from_f64(value).map_or_else(
        || {
            let text = if value.is_nan() {
                "NaN"
            } else if value.is_sign_positive() {
                "Infinity"
            } else {
                "-Infinity"
            };
            JsonValue::String(text.to_string())
        },
        JsonValue::Number,
    )
}

fn enum_to_json(number: i32, kind: &Kind) -> JsonValue {
    if let Kind::Enum(descriptor) = kind
        && let Some(value) = descriptor.get_value(number)
    {
        return JsonValue::String(value.name().to_string());
    }
    JsonValue::from(number)
}

/// Returns `true` if at least one field holds a non-default value.
///
/// A lenient decoder accepts almost any byte string as an all-default
/// message of the wrong type; such candidates carry no content.
#[must_use]
pub fn has_content(message: &DynamicMessage) -> bool {
    message
        .descriptor()
        .fields()
        .any(|field| !is_default_value(&message.get_field(&field)))
}

fn is_default_value(value: &Value) -> bool {
    match value {
        Value::Bool(b) => !*b,
        Value::I32(n) | Value::EnumNumber(n) => *n == 0,
        Value::I64(n) => *n == 0,
        Value::U32(n) => *n == 0,
        Value::U64(n) => *n == 0,
        Value::F32(f) => *f == 0.0,
        Value::F64(f) => *f == 0.0,
        Value::String(s) => s.is_empty(),
        Value::Bytes(b) => b.is_empty(),
        Value::Message(m) => !has_content(m),
        Value::List(items) => items.is_empty(),
        Value::Map(entries) => entries.is_empty(),
    }
}
