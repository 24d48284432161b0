//! Conflux: a local-first, conflict-free replicated document engine.
//!
//! A [`Document`](document::Document) is a tree of maps, lists, and rich
//! text, mutated through transactions that commit into content-addressed
//! [`Change`](change::Change)s. Replicas exchange changes (directly, through
//! saved bytes, or over the [`sync`] protocol) and converge: two documents
//! that have absorbed the same set of changes materialize identical values
//! and save identical bytes.

pub mod apply;
pub mod autocommit;
pub mod change;
pub mod clock;
pub mod cursor;
pub mod diff;
pub mod document;
pub mod graph;
pub mod hash;
pub mod ids;
pub mod opset;
pub mod storage;
pub mod sync;
pub mod text;
pub mod transaction;
pub mod value;

use rand::Rng;

/// Draws a random non-zero actor index for a fresh document.
pub fn generate_actor() -> u32 {
    let mut rng = rand::thread_rng();
    rng.gen_range(1..=u32::MAX)
}

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
