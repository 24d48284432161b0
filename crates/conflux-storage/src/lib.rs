//! Binary containers and the columnar payload codec for conflux.
//!
//! This crate is the storage boundary of the engine: the core serializes
//! changes into chunk payloads and hands them to [`chunk`]; inbound bytes go
//! the other way. The [`legacy`] module recognizes the older binary container
//! so callers can preserve it bit-exact for interop, and [`columns`] holds the
//! raw-column format used by interchange fixtures.

pub mod chunk;
pub mod columns;
pub mod legacy;

pub use columns::{read_uleb, write_uleb};
