//! Dynamic protobuf schema handling.
//!
//! - [`registry`]: descriptor-set sources, discovery and layered decode
//! - [`decode`]: `DynamicMessage` to JSON rendering
//! - [`guess`]: topic-to-type scoring
//! - [`descriptor`]: builders for descriptor sets assembled in code

pub mod decode;
pub mod descriptor;
pub mod guess;
pub mod registry;

#[cfg(test)]
pub(crate) mod fixtures;

pub use decode::DecodeResult;
pub use registry::{SchemaRegistry, SchemaSource};
