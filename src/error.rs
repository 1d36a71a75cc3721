//! Data-plane error types.
//!
//! [`DataplaneError`] is the central error type. Internal code propagates
//! it with `?`; the public registry and manager operations log it and
//! collapse it into the `bool` / `Option` results callers expect, so no
//! error from this crate is ever fatal to the process.
//!
//! # Categories
//!
//! | Variant               | Category            | Recovery                       |
//! |-----------------------|---------------------|--------------------------------|
//! | `Transport`           | transport           | retry after cooldown           |
//! | `QueryTimeout`        | transport           | retry after cooldown           |
//! | `SessionUnavailable`  | transport           | re-armed on next session       |
//! | `MalformedDescriptor` | schema              | source skipped                 |
//! | `EmptyDescriptor`     | schema              | source skipped                 |
//! | `RegistryReset`       | schema              | source dropped, stale session  |
//! | `Decode`              | payload             | next decode strategy           |
//! | `TypeNotFound`        | payload             | caller falls back (hex, text)  |
//! | `UnknownEndpoint`     | caller              | none                           |
//! | `ProtectedEndpoint`   | caller              | none                           |
//! | `Config`              | startup             | none                           |

/// Error enum shared by the schema registry, the subscription manager and
/// the transport seam.
#[derive(Debug, thiserror::Error)]
pub enum DataplaneError {
    /// The bus rejected or failed an operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// A bus query did not complete within its deadline.
    #[error("query on {key_expr} timed out after {timeout_ms} ms")]
    QueryTimeout {
        /// Queried key expression.
        key_expr: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// No session is attached to the endpoint.
    #[error("no session attached to endpoint {0}")]
    SessionUnavailable(String),

    /// A descriptor-set blob could not be parsed.
    #[error("malformed descriptor set: {0}")]
    MalformedDescriptor(#[from] prost_reflect::DescriptorError),

    /// A descriptor set parsed but declares no message types.
    #[error("descriptor set from {0} declares no message types")]
    EmptyDescriptor(String),

    /// The registry was cleared while the descriptor set was in flight.
    #[error("registry was reset before {0} finished loading")]
    RegistryReset(String),

    /// Payload bytes did not decode as the requested type.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The requested type is not present in any loaded source.
    #[error("type not found in any schema source: {0}")]
    TypeNotFound(String),

    /// The referenced endpoint has not been registered.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// The endpoint exists but may not be removed.
    #[error("endpoint {0} cannot be removed")]
    ProtectedEndpoint(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_convert_from_prost() {
        let Err(decode_err) = <u32 as prost::Message>::decode(&b"\xff"[..]) else {
            panic!("truncated varint should not decode");
        };
        let err: DataplaneError = decode_err.into();
        assert!(matches!(err, DataplaneError::Decode(_)));
        assert!(err.to_string().starts_with("decode error:"));
    }

    #[test]
    fn session_and_reset_messages_name_their_subject() {
        let err = DataplaneError::SessionUnavailable("robot".to_string());
        assert_eq!(err.to_string(), "no session attached to endpoint robot");
        let err = DataplaneError::RegistryReset("node:bubbaloop/local/m1/weather".to_string());
        assert!(err.to_string().contains("node:bubbaloop/local/m1/weather"));
    }

    #[test]
    fn timeout_message_names_key() {
        let err = DataplaneError::QueryTimeout {
            key_expr: "bubbaloop/local/m1/weather/schema".to_string(),
            timeout_ms: 3000,
        };
        let text = err.to_string();
        assert!(text.contains("bubbaloop/local/m1/weather/schema"));
        assert!(text.contains("3000"));
    }
}
