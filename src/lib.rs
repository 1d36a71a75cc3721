//! # bubbaloop-dataplane
//!
//! Telemetry data-plane for bubbaloop: runtime protobuf schema discovery
//! and deduplicated topic subscriptions over an opaque pub/sub session.
//!
//! Publishers on the bus send protobuf payloads without compiled
//! bindings on the consumer side. This crate fetches descriptor sets from
//! the daemon and from each node at runtime, decodes payloads reflectively
//! into JSON trees, and multiplexes any number of listeners per topic onto
//! a single bus subscriber.
//!
//! ## Architecture
//!
//! ```text
//! Consumers (UI, CLI)
//!     │
//!     ├── TelemetryService (service/)
//!     │       │
//!     │       ├── SchemaRegistry (schema/)        descriptor sources, decode
//!     │       └── SubscriptionManager (subscription/)  per-topic state machine
//!     │
//!     ├── EventBus + topic codec (domain/)
//!     │
//!     └── Session trait (bus/)  ── MemoryBus or a real transport
//! ```

pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod schema;
pub mod service;
pub mod subscription;

pub use config::DataplaneConfig;
pub use error::DataplaneError;
