//! The document: the owning façade over the change graph, the op set, the
//! change store, and the ingest queue.
//!
//! A document is single-writer by construction: [`Document::begin`] hands out
//! a transaction that borrows the document mutably, so reads resume only
//! after the transaction commits or rolls back.

use std::collections::HashMap;

use thiserror::Error;

use conflux_storage::chunk::ChunkError;
use conflux_storage::legacy::LegacyError;

use crate::change::Change;
use crate::clock::Clock;
use crate::graph::{ChangeGraph, GraphError};
use crate::ids::{ChangeHash, IdError, ObjId};
use crate::opset::{Mark, OpSet, OpSetError};
use crate::transaction::Transaction;
use crate::value::Value;

#[derive(Debug, Error)]
pub enum DocError {
    #[error("transaction already open")]
    TransactionOpen,
    #[error("invalid current actor")]
    InvalidCurrentActor,
    #[error("no last committed change")]
    NoLastCommittedChange,
    #[error("duplicate sequence number: actor={actor} seq={seq}")]
    DuplicateSeqNumber { actor: u32, seq: u64 },
    #[error("mark not open")]
    MarkNotOpen,
    #[error("mark not closed")]
    MarkNotClosed,
    #[error("invalid mark range")]
    InvalidMarkRange,
    #[error("diff unknown object")]
    DiffUnknownObject,
    #[error("missing change {0} in merge source")]
    MissingMergeChange(ChangeHash),
    #[error("partial load: {0}")]
    PartialLoad(String),
    #[error("invalid change payload: {0}")]
    InvalidChangeDto(&'static str),
    #[error("sync decode changes: {0}")]
    SyncDecodeChanges(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    OpSet(#[from] OpSetError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Legacy(#[from] LegacyError),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("document codec: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SaveCacheKey {
    pub(crate) deflate: bool,
    pub(crate) retain_orphans: bool,
}

#[derive(Debug)]
pub struct Document {
    pub(crate) graph: ChangeGraph,
    pub(crate) ops: OpSet,

    pub(crate) changes: HashMap<ChangeHash, Change>,
    /// Changes whose dependencies have not arrived yet.
    pub(crate) queue: Vec<Change>,
    /// Raw bytes of a legacy-format document preserved for byte-exact saves.
    pub(crate) legacy_raw: Option<Vec<u8>>,
    pub(crate) save_cache: HashMap<SaveCacheKey, Vec<u8>>,

    pub(crate) actor: u32,
    pub(crate) tx_open: bool,
    pub(crate) last: Option<Change>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Document {
            graph: ChangeGraph::new(),
            ops: OpSet::new(),
            changes: HashMap::new(),
            queue: Vec::new(),
            legacy_raw: None,
            save_cache: HashMap::new(),
            actor: 1,
            tx_open: false,
            last: None,
        }
    }

    /// A fresh document with a randomly drawn actor index.
    pub fn with_random_actor() -> Self {
        let mut doc = Self::new();
        doc.actor = crate::generate_actor();
        doc
    }

    pub fn set_actor(&mut self, actor: u32) -> Result<(), DocError> {
        if actor == 0 {
            return Err(DocError::InvalidCurrentActor);
        }
        self.actor = actor;
        Ok(())
    }

    pub fn actor(&self) -> u32 {
        self.actor
    }

    pub fn heads(&self) -> Vec<ChangeHash> {
        self.graph.heads()
    }

    pub fn last_change(&self) -> Result<Change, DocError> {
        self.last.clone().ok_or(DocError::NoLastCommittedChange)
    }

    /// All applied changes in dependency-first deterministic order.
    pub fn all_changes(&self) -> Vec<Change> {
        let Ok(hashes) = self.graph.hashes_from_heads(&self.heads()) else {
            return Vec::new();
        };
        hashes
            .into_iter()
            .filter_map(|h| self.changes.get(&h).cloned())
            .collect()
    }

    pub fn begin(&mut self) -> Result<Transaction<'_>, DocError> {
        if self.tx_open {
            return Err(DocError::TransactionOpen);
        }
        self.tx_open = true;
        Ok(Transaction::new(self))
    }

    pub fn validate(&self) -> Result<(), DocError> {
        Ok(self.graph.validate()?)
    }

    pub fn get_map(&self, obj: ObjId, key: &str, at: Option<&Clock>) -> Option<Value> {
        self.ops.get_map(obj, key, at)
    }

    pub fn get_map_at(
        &self,
        obj: ObjId,
        key: &str,
        heads: &[ChangeHash],
    ) -> Result<Option<Value>, DocError> {
        let clock = self.clock_at(heads)?;
        Ok(self.ops.get_map(obj, key, Some(&clock)))
    }

    pub fn get_all_map(&self, obj: ObjId, key: &str, at: Option<&Clock>) -> Vec<Value> {
        self.ops.get_all_map(obj, key, at)
    }

    pub fn get_all_map_at(
        &self,
        obj: ObjId,
        key: &str,
        heads: &[ChangeHash],
    ) -> Result<Vec<Value>, DocError> {
        let clock = self.clock_at(heads)?;
        Ok(self.ops.get_all_map(obj, key, Some(&clock)))
    }

    pub fn text(&self, obj: ObjId, at: Option<&Clock>) -> String {
        self.ops.text(obj, at)
    }

    pub fn text_at(&self, obj: ObjId, heads: &[ChangeHash]) -> Result<String, DocError> {
        let clock = self.clock_at(heads)?;
        Ok(self.ops.text(obj, Some(&clock)))
    }

    pub fn marks(&self, obj: ObjId, at: Option<&Clock>) -> Vec<Mark> {
        self.ops.marks(obj, at)
    }

    pub fn marks_at(&self, obj: ObjId, heads: &[ChangeHash]) -> Result<Vec<Mark>, DocError> {
        let clock = self.clock_at(heads)?;
        Ok(self.ops.marks(obj, Some(&clock)))
    }

    pub fn marks_at_index(&self, obj: ObjId, index: usize, at: Option<&Clock>) -> Vec<Mark> {
        self.ops.marks_at_index(obj, index, at)
    }

    pub fn marks_at_index_at(
        &self,
        obj: ObjId,
        index: usize,
        heads: &[ChangeHash],
    ) -> Result<Vec<Mark>, DocError> {
        let clock = self.clock_at(heads)?;
        Ok(self.ops.marks_at_index(obj, index, Some(&clock)))
    }

    pub fn list_range(
        &self,
        obj: ObjId,
        start: usize,
        end: Option<usize>,
        at: Option<&Clock>,
    ) -> Vec<Value> {
        self.ops.list_range(obj, start, end, at)
    }

    pub fn list_range_at(
        &self,
        obj: ObjId,
        start: usize,
        end: Option<usize>,
        heads: &[ChangeHash],
    ) -> Result<Vec<Value>, DocError> {
        let clock = self.clock_at(heads)?;
        Ok(self.ops.list_range(obj, start, end, Some(&clock)))
    }

    pub fn keys_map_at(&self, obj: ObjId, heads: &[ChangeHash]) -> Result<Vec<String>, DocError> {
        let clock = self.clock_at(heads)?;
        Ok(self.ops.keys_map(obj, Some(&clock)))
    }

    pub fn values_map_at(&self, obj: ObjId, heads: &[ChangeHash]) -> Result<Vec<Value>, DocError> {
        let clock = self.clock_at(heads)?;
        Ok(self.ops.values_map(obj, Some(&clock)))
    }

    pub fn iter_map_at(
        &self,
        obj: ObjId,
        heads: &[ChangeHash],
    ) -> Result<Vec<(String, Value)>, DocError> {
        let clock = self.clock_at(heads)?;
        Ok(self.ops.iter_map(obj, Some(&clock)))
    }

    /// The clock induced by `heads`; empty heads mean the current heads.
    pub fn clock_for_heads(&self, heads: &[ChangeHash]) -> Result<Clock, DocError> {
        if heads.is_empty() {
            return Ok(self.graph.clock_for_heads(&self.graph.heads())?);
        }
        Ok(self.graph.clock_for_heads(heads)?)
    }

    /// The clock used by historical reads; empty heads mean "nothing
    /// visible", which is how a diff against the document's beginning works.
    pub(crate) fn clock_at(&self, heads: &[ChangeHash]) -> Result<Clock, DocError> {
        if heads.is_empty() {
            return Ok(Clock::new());
        }
        Ok(self.graph.clock_for_heads(heads)?)
    }

    pub(crate) fn dependencies_for_actor_seq(&self, actor: u32, seq: u64) -> Vec<ChangeHash> {
        let mut deps = self.graph.heads();
        if seq > 1 {
            if let Some(prev) = self.graph.hash_for_actor_seq(actor, seq - 1) {
                if !deps.contains(&prev) {
                    deps.push(prev);
                    deps.sort_unstable();
                }
            }
        }
        deps
    }

    pub(crate) fn has_change(&self, hash: ChangeHash) -> bool {
        self.graph.has_change(hash)
    }

    /// Invalidates everything derived from the applied change set.
    pub(crate) fn clear_derived_caches(&mut self) {
        self.legacy_raw = None;
        self.save_cache.clear();
    }
}
