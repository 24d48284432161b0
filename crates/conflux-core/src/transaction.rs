//! Transactions: the staging area between caller mutations and a committed,
//! hash-identified change.
//!
//! A transaction captures its checkpoint at `begin` (actor, next seq, next op
//! counter, dependency frontier) and stages mutations without touching the op
//! set. `commit` assigns contiguous OpIds, applies the mutations in order,
//! computes the content address, and appends the change to the graph. An
//! empty commit produces no change.

use crate::change::{Change, ChangeOp};
use crate::document::{DocError, Document};
use crate::graph::ChangeMeta;
use crate::hash::compute_change_hash;
use crate::ids::{ChangeHash, ObjId, OpId};
use crate::opset::OpSet;
use crate::value::{ObjType, ScalarValue, Value};

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: Option<String>,
    pub time: Option<i64>,
}

#[derive(Debug, Clone)]
struct Checkpoint {
    actor: u32,
    seq: u64,
    start_op: u64,
    deps: Vec<ChangeHash>,
}

#[derive(Debug, Clone)]
enum Mutation {
    Put { obj: ObjId, key: String, value: ScalarValue },
    PutObject { obj: ObjId, key: String, ty: ObjType, child: ObjId },
    Insert { obj: ObjId, index: usize, value: ScalarValue },
    InsertObject { obj: ObjId, index: usize, ty: ObjType, child: ObjId },
    DeleteMap { obj: ObjId, key: String },
    DeleteList { obj: ObjId, index: usize },
    Increment { obj: ObjId, key: String, by: i64 },
    SpliceText { obj: ObjId, index: usize, delete_count: usize, insert: String },
    Mark { obj: ObjId, start: usize, end: usize, name: String, value: ScalarValue },
}

impl Mutation {
    fn op_count(&self) -> u64 {
        match self {
            Mutation::SpliceText { delete_count, insert, .. } => {
                (*delete_count + insert.chars().count()) as u64
            }
            _ => 1,
        }
    }

    fn to_change_op(&self, id: OpId) -> ChangeOp {
        match self {
            Mutation::Put { obj, key, value } => ChangeOp::Put {
                id,
                obj: *obj,
                key: key.clone(),
                value: value.clone(),
            },
            Mutation::PutObject { obj, key, ty, child } => ChangeOp::PutObject {
                id,
                obj: *obj,
                key: key.clone(),
                ty: *ty,
                child: *child,
            },
            Mutation::Insert { obj, index, value } => ChangeOp::Insert {
                id,
                obj: *obj,
                index: *index,
                value: value.clone(),
            },
            Mutation::InsertObject { obj, index, ty, child } => ChangeOp::InsertObject {
                id,
                obj: *obj,
                index: *index,
                ty: *ty,
                child: *child,
            },
            Mutation::DeleteMap { obj, key } => ChangeOp::DeleteMap {
                id,
                obj: *obj,
                key: key.clone(),
            },
            Mutation::DeleteList { obj, index } => ChangeOp::DeleteList {
                id,
                obj: *obj,
                index: *index,
            },
            Mutation::Increment { obj, key, by } => ChangeOp::Increment {
                id,
                obj: *obj,
                key: key.clone(),
                by: *by,
            },
            Mutation::SpliceText { obj, index, delete_count, insert } => ChangeOp::SpliceText {
                id,
                obj: *obj,
                index: *index,
                delete_count: *delete_count,
                insert: insert.clone(),
            },
            Mutation::Mark { obj, start, end, name, value } => ChangeOp::Mark {
                id,
                obj: *obj,
                start: *start,
                end: *end,
                name: name.clone(),
                value: value.clone(),
            },
        }
    }

    fn apply(&self, ops: &mut OpSet, id: OpId, actor: u32) -> Result<(), DocError> {
        let seq = id.counter;
        match self {
            Mutation::Put { obj, key, value } => {
                ops.put_map(*obj, key, Value::Scalar(value.clone()), id, actor, seq)?
            }
            Mutation::PutObject { obj, key, ty, child } => {
                ops.create_object(*child, *ty);
                ops.put_map(*obj, key, Value::object(*child, *ty), id, actor, seq)?
            }
            Mutation::Insert { obj, index, value } => {
                ops.insert_list(*obj, *index, Value::Scalar(value.clone()), id, actor, seq)?
            }
            Mutation::InsertObject { obj, index, ty, child } => {
                ops.create_object(*child, *ty);
                ops.insert_list(*obj, *index, Value::object(*child, *ty), id, actor, seq)?
            }
            Mutation::DeleteMap { obj, key } => ops.delete_map(*obj, key, id, actor, seq)?,
            Mutation::DeleteList { obj, index } => ops.delete_list(*obj, *index, id, actor, seq)?,
            Mutation::Increment { obj, key, by } => {
                ops.increment_map_counter(*obj, key, *by, id, actor, seq, None)?
            }
            Mutation::SpliceText { obj, index, delete_count, insert } => {
                let start = seq.saturating_sub(1);
                ops.splice_text(*obj, *index, *delete_count, insert, actor, start)?;
            }
            Mutation::Mark { obj, start, end, name, value } => {
                ops.add_mark(*obj, *start, *end, name, value.clone(), id, actor, seq)?
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct OpenMark {
    obj: ObjId,
    start: usize,
    name: String,
    value: ScalarValue,
}

pub struct Transaction<'a> {
    doc: &'a mut Document,
    cp: Checkpoint,
    muts: Vec<Mutation>,
    open_marks: Vec<OpenMark>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(doc: &'a mut Document) -> Self {
        let actor = doc.actor;
        let seq = doc.graph.seq_for_actor(actor) + 1;
        let start_op = doc.graph.max_op() + 1;
        let deps = doc.dependencies_for_actor_seq(actor, seq);
        Transaction {
            doc,
            cp: Checkpoint {
                actor,
                seq,
                start_op,
                deps,
            },
            muts: Vec::new(),
            open_marks: Vec::new(),
        }
    }

    pub fn put(&mut self, obj: ObjId, key: &str, value: ScalarValue) {
        self.muts.push(Mutation::Put {
            obj,
            key: key.to_string(),
            value,
        });
    }

    /// Stages a child-object creation and returns the id the object will
    /// have once committed.
    pub fn put_object(&mut self, obj: ObjId, key: &str, ty: ObjType) -> ObjId {
        let child = ObjId::Op(self.next_op_id());
        self.muts.push(Mutation::PutObject {
            obj,
            key: key.to_string(),
            ty,
            child,
        });
        child
    }

    pub fn insert(&mut self, obj: ObjId, index: usize, value: ScalarValue) {
        self.muts.push(Mutation::Insert { obj, index, value });
    }

    pub fn insert_object(&mut self, obj: ObjId, index: usize, ty: ObjType) -> ObjId {
        let child = ObjId::Op(self.next_op_id());
        self.muts.push(Mutation::InsertObject {
            obj,
            index,
            ty,
            child,
        });
        child
    }

    pub fn delete_map(&mut self, obj: ObjId, key: &str) {
        self.muts.push(Mutation::DeleteMap {
            obj,
            key: key.to_string(),
        });
    }

    pub fn delete_list(&mut self, obj: ObjId, index: usize) {
        self.muts.push(Mutation::DeleteList { obj, index });
    }

    pub fn increment(&mut self, obj: ObjId, key: &str, by: i64) {
        self.muts.push(Mutation::Increment {
            obj,
            key: key.to_string(),
            by,
        });
    }

    pub fn splice_text(&mut self, obj: ObjId, index: usize, delete_count: usize, insert: &str) {
        if delete_count == 0 && insert.is_empty() {
            return;
        }
        self.muts.push(Mutation::SpliceText {
            obj,
            index,
            delete_count,
            insert: insert.to_string(),
        });
    }

    pub fn mark(
        &mut self,
        obj: ObjId,
        start: usize,
        end: usize,
        name: &str,
        value: ScalarValue,
    ) -> Result<(), DocError> {
        if end < start {
            return Err(DocError::InvalidMarkRange);
        }
        self.muts.push(Mutation::Mark {
            obj,
            start,
            end,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    /// Opens a mark at `index`; it must be closed with
    /// [`mark_end`](Self::mark_end) before commit.
    pub fn mark_begin(&mut self, obj: ObjId, index: usize, name: &str, value: ScalarValue) {
        self.open_marks.push(OpenMark {
            obj,
            start: index,
            name: name.to_string(),
            value,
        });
    }

    /// Closes the most recently opened mark with the same object and name.
    pub fn mark_end(&mut self, obj: ObjId, index: usize, name: &str) -> Result<(), DocError> {
        for i in (0..self.open_marks.len()).rev() {
            if self.open_marks[i].obj != obj || self.open_marks[i].name != name {
                continue;
            }
            if index < self.open_marks[i].start {
                return Err(DocError::InvalidMarkRange);
            }
            let open = self.open_marks.remove(i);
            self.muts.push(Mutation::Mark {
                obj,
                start: open.start,
                end: index,
                name: open.name,
                value: open.value,
            });
            return Ok(());
        }
        Err(DocError::MarkNotOpen)
    }

    pub fn commit(self) -> Result<Option<Change>, DocError> {
        self.commit_with(CommitOptions::default())
    }

    pub fn commit_with(mut self, opts: CommitOptions) -> Result<Option<Change>, DocError> {
        if !self.open_marks.is_empty() {
            return Err(DocError::MarkNotClosed);
        }
        if self.muts.is_empty() {
            return Ok(None);
        }

        let mut change_ops = Vec::with_capacity(self.muts.len());
        let mut offset = 0u64;
        let muts = std::mem::take(&mut self.muts);
        for m in &muts {
            let id = OpId::new(self.cp.start_op + offset, self.cp.actor);
            m.apply(&mut self.doc.ops, id, self.cp.actor)?;
            change_ops.push(m.to_change_op(id));
            offset += m.op_count();
        }
        if offset == 0 {
            return Ok(None);
        }

        let max_op = self.cp.start_op + offset - 1;
        let hash = compute_change_hash(
            self.cp.actor,
            self.cp.seq,
            self.cp.start_op,
            max_op,
            &self.cp.deps,
            opts.message.as_deref(),
            opts.time,
            &change_ops,
        );

        self.doc.graph.add_change(ChangeMeta {
            hash,
            deps: self.cp.deps.clone(),
            actor: self.cp.actor,
            seq: self.cp.seq,
            max_op,
        })?;

        let change = Change {
            hash,
            actor: self.cp.actor,
            seq: self.cp.seq,
            start_op: self.cp.start_op,
            max_op,
            deps: self.cp.deps.clone(),
            message: opts.message,
            time: opts.time,
            ops: change_ops,
        };
        self.doc.changes.insert(hash, change.clone());
        self.doc.clear_derived_caches();
        self.doc.last = Some(change.clone());
        Ok(Some(change))
    }

    /// Drops every staged mutation. Equivalent to dropping the transaction.
    pub fn rollback(mut self) {
        self.muts.clear();
        self.open_marks.clear();
    }

    fn next_op_id(&self) -> OpId {
        let staged: u64 = self.muts.iter().map(Mutation::op_count).sum();
        OpId::new(self.cp.start_op + staged, self.cp.actor)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.doc.tx_open = false;
    }
}
