//! Domain layer: identifiers, events and the topic codec.
//!
//! This module contains the types shared by the schema registry and the
//! subscription manager: listener identity, the event bus for
//! broadcasting lifecycle changes, and the pure topic helpers both sides
//! use to interpret the two coexisting topic encodings.

pub mod dataplane_event;
pub mod event_bus;
pub mod listener_id;
pub mod topic;

pub use dataplane_event::DataplaneEvent;
pub use event_bus::EventBus;
pub use listener_id::ListenerId;

/// Identifier of the always-present local endpoint.
pub const DEFAULT_ENDPOINT: &str = "local";
