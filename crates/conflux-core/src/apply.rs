//! Ingesting externally sourced changes.
//!
//! Incoming batches are deduplicated by hash, checked for (actor, seq)
//! collisions, and split into causally-ready changes and a pending queue that
//! survives across calls. Ready changes apply in topological order with the
//! change-hash total order breaking ties, so any permutation of the same
//! batch yields the same document.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::debug;

use crate::change::{Change, ChangeOp};
use crate::clock::Clock;
use crate::document::{DocError, Document};
use crate::graph::ChangeMeta;
use crate::ids::{ChangeHash, ObjId, OpId};
use crate::opset::OpSet;
use crate::value::Value;

impl Document {
    pub fn apply_changes(&mut self, changes: Vec<Change>) -> Result<(), DocError> {
        self.apply_changes_with_actor_map(changes, None)
    }

    /// As [`apply_changes`](Self::apply_changes), optionally renaming actor
    /// indices in every change and operation id first.
    pub fn apply_changes_with_actor_map(
        &mut self,
        changes: Vec<Change>,
        actor_map: Option<&HashMap<u32, u32>>,
    ) -> Result<(), DocError> {
        let mut ready: HashSet<ChangeHash> = HashSet::new();
        let mut batch: Vec<Change> = Vec::with_capacity(changes.len());

        for mut c in changes {
            if let Some(map) = actor_map {
                remap_change_actors(&mut c, map);
            }
            if self.has_change(c.hash) {
                continue;
            }
            if let Some(existing) = self.graph.hash_for_actor_seq(c.actor, c.seq) {
                if existing != c.hash {
                    return Err(DocError::DuplicateSeqNumber {
                        actor: c.actor,
                        seq: c.seq,
                    });
                }
                continue;
            }
            if self.is_causally_ready(&c, &ready) {
                ready.insert(c.hash);
                batch.push(c);
            } else {
                self.queue.push(c);
            }
        }

        while let Some(next) = self.pop_next_causally_ready(&ready) {
            ready.insert(next.hash);
            batch.push(next);
        }
        if !self.queue.is_empty() {
            debug!(pending = self.queue.len(), "changes awaiting dependencies");
        }

        for idx in order_changes_topologically(&batch) {
            let c = &batch[idx];
            if self.has_change(c.hash) {
                continue;
            }
            self.apply_one_change(c.clone())?;
        }
        Ok(())
    }

    /// Pulls every change the other document has that this one lacks and
    /// applies it.
    pub fn merge(&mut self, other: &Document) -> Result<(), DocError> {
        let hashes = self.changes_added_by(other);
        let mut changes = Vec::with_capacity(hashes.len());
        for h in hashes {
            match other.changes.get(&h) {
                Some(c) => changes.push(c.clone()),
                None => return Err(DocError::MissingMergeChange(h)),
            }
        }
        self.apply_changes(changes)
    }

    /// Hashes present in `other` but not here, dependencies first.
    fn changes_added_by(&self, other: &Document) -> Vec<ChangeHash> {
        let mut stack = other.heads();
        let mut seen: HashSet<ChangeHash> = HashSet::new();
        let mut out = Vec::new();

        while let Some(h) = stack.pop() {
            if !seen.insert(h) {
                continue;
            }
            if self.has_change(h) {
                continue;
            }
            out.push(h);
            if let Some(deps) = other.graph.deps_for_hash(h) {
                stack.extend(deps);
            }
        }

        out.reverse();
        out
    }

    fn is_causally_ready(&self, c: &Change, ready: &HashSet<ChangeHash>) -> bool {
        c.deps
            .iter()
            .all(|dep| self.has_change(*dep) || ready.contains(dep))
    }

    fn pop_next_causally_ready(&mut self, ready: &HashSet<ChangeHash>) -> Option<Change> {
        let idx = self
            .queue
            .iter()
            .position(|c| self.is_causally_ready(c, ready))?;
        Some(self.queue.swap_remove(idx))
    }

    fn apply_one_change(&mut self, c: Change) -> Result<(), DocError> {
        // Predecessor sets are resolved against the change's causal past (its
        // dependency clock, advanced over the change's own ops), never the
        // live state: concurrent writers must not tombstone each other, and
        // every replica has to derive the same pred sets.
        let mut clock = if c.deps.is_empty() {
            Clock::new()
        } else {
            self.graph.clock_for_heads(&c.deps)?
        };
        for op in &c.ops {
            clock.observe(c.actor, op.id().counter + op.op_count() - 1);
            apply_change_op(&mut self.ops, c.actor, op, &clock)?;
        }
        self.graph.add_change(ChangeMeta {
            hash: c.hash,
            deps: c.deps.clone(),
            actor: c.actor,
            seq: c.seq,
            max_op: c.max_op,
        })?;
        self.changes.insert(c.hash, c.clone());
        self.clear_derived_caches();
        self.last = Some(c);
        Ok(())
    }
}

pub(crate) fn apply_change_op(
    ops: &mut OpSet,
    actor: u32,
    op: &ChangeOp,
    at: &Clock,
) -> Result<(), DocError> {
    let seq = op.id().counter;
    match op {
        ChangeOp::Put { id, obj, key, value } => {
            let pred = ops.visible_map_version_ids(*obj, key, Some(at));
            ops.put_map_raw(*obj, key, Value::Scalar(value.clone()), *id, actor, seq, pred)?
        }
        ChangeOp::PutObject { id, obj, key, ty, child } => {
            ops.create_object(*child, *ty);
            let pred = ops.visible_map_version_ids(*obj, key, Some(at));
            ops.put_map_raw(*obj, key, Value::object(*child, *ty), *id, actor, seq, pred)?
        }
        ChangeOp::Insert { id, obj, index, value } => {
            ops.insert_list(*obj, *index, Value::Scalar(value.clone()), *id, actor, seq)?
        }
        ChangeOp::InsertObject { id, obj, index, ty, child } => {
            ops.create_object(*child, *ty);
            ops.insert_list(*obj, *index, Value::object(*child, *ty), *id, actor, seq)?
        }
        ChangeOp::DeleteMap { id, obj, key } => {
            let pred = ops.visible_map_version_ids(*obj, key, Some(at));
            ops.delete_map_raw(*obj, key, *id, actor, seq, pred)?
        }
        ChangeOp::DeleteList { id, obj, index } => {
            ops.delete_list(*obj, *index, *id, actor, seq)?
        }
        ChangeOp::Increment { id, obj, key, by } => {
            ops.increment_map_counter(*obj, key, *by, *id, actor, seq, Some(at))?
        }
        ChangeOp::SpliceText { obj, index, delete_count, insert, .. } => {
            let start = seq.saturating_sub(1);
            ops.splice_text(*obj, *index, *delete_count, insert, actor, start)?;
        }
        ChangeOp::Mark { id, obj, start, end, name, value } => {
            ops.add_mark(*obj, *start, *end, name, value.clone(), *id, actor, seq)?
        }
    }
    Ok(())
}

/// Topological order over the batch, ready nodes popped in ascending hash
/// order. Falls back to plain hash order if the sort cannot cover the batch
/// (unreachable when invariants hold, guarded anyway).
fn order_changes_topologically(batch: &[Change]) -> Vec<usize> {
    if batch.len() <= 1 {
        return (0..batch.len()).collect();
    }
    let index_by_hash: HashMap<ChangeHash, usize> =
        batch.iter().enumerate().map(|(i, c)| (c.hash, i)).collect();

    let mut deps_count = vec![0usize; batch.len()];
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, c) in batch.iter().enumerate() {
        for dep in &c.deps {
            if let Some(&j) = index_by_hash.get(dep) {
                deps_count[i] += 1;
                dependents.entry(j).or_default().push(i);
            }
        }
    }

    let mut heap: BinaryHeap<Reverse<(ChangeHash, usize)>> = BinaryHeap::new();
    for (i, &count) in deps_count.iter().enumerate() {
        if count == 0 {
            heap.push(Reverse((batch[i].hash, i)));
        }
    }

    let mut out = Vec::with_capacity(batch.len());
    while let Some(Reverse((_, i))) = heap.pop() {
        out.push(i);
        if let Some(deps) = dependents.get(&i) {
            for &d in deps {
                deps_count[d] -= 1;
                if deps_count[d] == 0 {
                    heap.push(Reverse((batch[d].hash, d)));
                }
            }
        }
    }

    if out.len() != batch.len() {
        let mut fallback: Vec<usize> = (0..batch.len()).collect();
        fallback.sort_by_key(|&i| batch[i].hash);
        return fallback;
    }
    out
}

fn remap_change_actors(c: &mut Change, actor_map: &HashMap<u32, u32>) {
    c.actor = remap_actor_index(c.actor, actor_map);
    for op in &mut c.ops {
        match op {
            ChangeOp::Put { id, obj, .. }
            | ChangeOp::DeleteMap { id, obj, .. }
            | ChangeOp::DeleteList { id, obj, .. }
            | ChangeOp::Increment { id, obj, .. }
            | ChangeOp::Insert { id, obj, .. }
            | ChangeOp::SpliceText { id, obj, .. }
            | ChangeOp::Mark { id, obj, .. } => {
                *id = remap_op_id(*id, actor_map);
                *obj = remap_obj_id(*obj, actor_map);
            }
            ChangeOp::PutObject { id, obj, child, .. }
            | ChangeOp::InsertObject { id, obj, child, .. } => {
                *id = remap_op_id(*id, actor_map);
                *obj = remap_obj_id(*obj, actor_map);
                *child = remap_obj_id(*child, actor_map);
            }
        }
    }
}

fn remap_actor_index(actor: u32, actor_map: &HashMap<u32, u32>) -> u32 {
    actor_map.get(&actor).copied().unwrap_or(actor)
}

pub(crate) fn remap_op_id(id: OpId, actor_map: &HashMap<u32, u32>) -> OpId {
    OpId::new(id.counter, remap_actor_index(id.actor, actor_map))
}

pub(crate) fn remap_obj_id(obj: ObjId, actor_map: &HashMap<u32, u32>) -> ObjId {
    match obj {
        ObjId::Root => ObjId::Root,
        ObjId::Op(id) => ObjId::Op(remap_op_id(id, actor_map)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topological_order_breaks_ties_by_hash() {
        let mk = |hash: u8, deps: Vec<ChangeHash>| Change {
            hash: ChangeHash([hash; 32]),
            actor: 1,
            seq: 1,
            start_op: 1,
            max_op: 1,
            deps,
            message: None,
            time: None,
            ops: Vec::new(),
        };
        // Two roots (0x30, 0x10) and one dependent of 0x30.
        let batch = vec![
            mk(0x30, vec![]),
            mk(0x20, vec![ChangeHash([0x30; 32])]),
            mk(0x10, vec![]),
        ];
        let order = order_changes_topologically(&batch);
        assert_eq!(order, vec![2, 0, 1]);
    }
}
