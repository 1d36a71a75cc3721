//! Service layer: telemetry orchestration.
//!
//! [`TelemetryService`] subscribes through the
//! [`crate::subscription::SubscriptionManager`], decodes every sample
//! through the [`crate::schema::SchemaRegistry`] and kicks schema
//! discovery when a sample cannot be decoded yet.

pub mod telemetry_service;

pub use telemetry_service::{DecodedSample, SampleCallback, TelemetryService};
