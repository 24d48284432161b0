//! The operation set: the per-object op log and its materializer.
//!
//! Every write appends an [`OpRecord`] with a precomputed `pred` set (the
//! OpIds of the versions it supersedes). Materialization replays the log into
//! per-object state, dropping superseded versions as their tombstoning ops
//! arrive; the surviving version with the highest OpId wins reads. A
//! [`Clock`] restricts replay to the ops it covers, which is how every
//! historical "read at heads" query works.
//!
//! A `current` map-object state is kept in sync on each append so that write
//! paths can resolve map predecessors without replaying the log.

use std::collections::HashMap;

use thiserror::Error;

use crate::clock::Clock;
use crate::ids::{ObjId, OpId};
use crate::value::{ObjType, ScalarValue, Value, VersionedValue};

#[derive(Debug, Error)]
pub enum OpSetError {
    #[error("unknown object: {0}")]
    UnknownObject(ObjId),
    #[error("wrong object type: have={0}")]
    WrongObjectType(ObjType),
    #[error("invalid index")]
    InvalidIndex,
    #[error("counter not found at key={0}")]
    CounterNotFound(String),
}

/// A named annotation over a rune range of a text object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    pub start: usize,
    pub end: usize,
    pub name: String,
    pub value: ScalarValue,
    pub id: OpId,
    pub actor: u32,
    pub seq: u64,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    versions: Vec<VersionedValue>,
}

#[derive(Debug, Clone)]
enum ObjState {
    Map(HashMap<String, Slot>),
    Seq { elems: Vec<Slot>, marks: Vec<Mark> },
}

impl ObjState {
    fn for_type(ty: ObjType) -> Self {
        match ty {
            ObjType::Map => ObjState::Map(HashMap::new()),
            ObjType::List | ObjType::Text => ObjState::Seq {
                elems: Vec::new(),
                marks: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone)]
enum OpRecord {
    MapPut { obj: ObjId, key: String, value: Value, id: OpId, actor: u32, seq: u64, pred: Vec<OpId> },
    MapDelete { obj: ObjId, key: String, id: OpId, actor: u32, seq: u64, pred: Vec<OpId> },
    ListInsert { obj: ObjId, index: usize, value: Value, id: OpId, actor: u32, seq: u64 },
    ListSet { obj: ObjId, index: usize, value: Value, id: OpId, actor: u32, seq: u64, pred: Vec<OpId> },
    ListDelete { obj: ObjId, index: usize, id: OpId, actor: u32, seq: u64 },
    Mark { obj: ObjId, start: usize, end: usize, name: String, value: ScalarValue, id: OpId, actor: u32, seq: u64 },
}

impl OpRecord {
    fn id(&self) -> OpId {
        match self {
            OpRecord::MapPut { id, .. }
            | OpRecord::MapDelete { id, .. }
            | OpRecord::ListInsert { id, .. }
            | OpRecord::ListSet { id, .. }
            | OpRecord::ListDelete { id, .. }
            | OpRecord::Mark { id, .. } => *id,
        }
    }

    fn actor_seq(&self) -> (u32, u64) {
        match self {
            OpRecord::MapPut { actor, seq, .. }
            | OpRecord::MapDelete { actor, seq, .. }
            | OpRecord::ListInsert { actor, seq, .. }
            | OpRecord::ListSet { actor, seq, .. }
            | OpRecord::ListDelete { actor, seq, .. }
            | OpRecord::Mark { actor, seq, .. } => (*actor, *seq),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpSet {
    types: HashMap<ObjId, ObjType>,
    current: HashMap<ObjId, ObjState>,
    ops: Vec<OpRecord>,
}

impl Default for OpSet {
    fn default() -> Self {
        Self::new()
    }
}

impl OpSet {
    pub fn new() -> Self {
        let mut types = HashMap::new();
        types.insert(ObjId::Root, ObjType::Map);
        let mut current = HashMap::new();
        current.insert(ObjId::Root, ObjState::for_type(ObjType::Map));
        OpSet {
            types,
            current,
            ops: Vec::new(),
        }
    }

    pub fn object_type(&self, id: ObjId) -> Option<ObjType> {
        self.types.get(&id).copied()
    }

    /// Registers an object the first time its creating op is seen. Repeat
    /// registrations are ignored; objects are created once and never removed.
    pub fn create_object(&mut self, id: ObjId, ty: ObjType) {
        if self.types.contains_key(&id) {
            return;
        }
        self.types.insert(id, ty);
        self.current.insert(id, ObjState::for_type(ty));
    }

    fn ensure_type(&self, obj: ObjId, want: &[ObjType]) -> Result<(), OpSetError> {
        let ty = self
            .types
            .get(&obj)
            .copied()
            .ok_or(OpSetError::UnknownObject(obj))?;
        if want.contains(&ty) {
            Ok(())
        } else {
            Err(OpSetError::WrongObjectType(ty))
        }
    }

    pub fn put_map(
        &mut self,
        obj: ObjId,
        key: &str,
        value: Value,
        id: OpId,
        actor: u32,
        seq: u64,
    ) -> Result<(), OpSetError> {
        self.ensure_type(obj, &[ObjType::Map])?;
        let pred = self.current_map_version_ids(obj, key);
        self.push_record(OpRecord::MapPut {
            obj,
            key: key.to_string(),
            value,
            id,
            actor,
            seq,
            pred,
        });
        Ok(())
    }

    /// As [`put_map`](Self::put_map) but with a caller-supplied predecessor
    /// set, for replaying ops whose tombstones were fixed at creation time.
    pub fn put_map_raw(
        &mut self,
        obj: ObjId,
        key: &str,
        value: Value,
        id: OpId,
        actor: u32,
        seq: u64,
        pred: Vec<OpId>,
    ) -> Result<(), OpSetError> {
        self.ensure_type(obj, &[ObjType::Map])?;
        self.push_record(OpRecord::MapPut {
            obj,
            key: key.to_string(),
            value,
            id,
            actor,
            seq,
            pred,
        });
        Ok(())
    }

    pub fn delete_map(
        &mut self,
        obj: ObjId,
        key: &str,
        id: OpId,
        actor: u32,
        seq: u64,
    ) -> Result<(), OpSetError> {
        self.ensure_type(obj, &[ObjType::Map])?;
        let pred = self.current_map_version_ids(obj, key);
        self.push_record(OpRecord::MapDelete {
            obj,
            key: key.to_string(),
            id,
            actor,
            seq,
            pred,
        });
        Ok(())
    }

    /// As [`delete_map`](Self::delete_map) but with a caller-supplied
    /// predecessor set.
    pub fn delete_map_raw(
        &mut self,
        obj: ObjId,
        key: &str,
        id: OpId,
        actor: u32,
        seq: u64,
        pred: Vec<OpId>,
    ) -> Result<(), OpSetError> {
        self.ensure_type(obj, &[ObjType::Map])?;
        self.push_record(OpRecord::MapDelete {
            obj,
            key: key.to_string(),
            id,
            actor,
            seq,
            pred,
        });
        Ok(())
    }

    pub fn insert_list(
        &mut self,
        obj: ObjId,
        index: usize,
        value: Value,
        id: OpId,
        actor: u32,
        seq: u64,
    ) -> Result<(), OpSetError> {
        self.ensure_type(obj, &[ObjType::List, ObjType::Text])?;
        self.push_record(OpRecord::ListInsert {
            obj,
            index,
            value,
            id,
            actor,
            seq,
        });
        Ok(())
    }

    pub fn set_list(
        &mut self,
        obj: ObjId,
        index: usize,
        value: Value,
        id: OpId,
        actor: u32,
        seq: u64,
    ) -> Result<(), OpSetError> {
        self.ensure_type(obj, &[ObjType::List, ObjType::Text])?;
        let pred = self.visible_list_version_ids(obj, index, None);
        self.push_record(OpRecord::ListSet {
            obj,
            index,
            value,
            id,
            actor,
            seq,
            pred,
        });
        Ok(())
    }

    pub fn set_list_raw(
        &mut self,
        obj: ObjId,
        index: usize,
        value: Value,
        id: OpId,
        actor: u32,
        seq: u64,
        pred: Vec<OpId>,
    ) -> Result<(), OpSetError> {
        self.ensure_type(obj, &[ObjType::List, ObjType::Text])?;
        self.push_record(OpRecord::ListSet {
            obj,
            index,
            value,
            id,
            actor,
            seq,
            pred,
        });
        Ok(())
    }

    pub fn delete_list(
        &mut self,
        obj: ObjId,
        index: usize,
        id: OpId,
        actor: u32,
        seq: u64,
    ) -> Result<(), OpSetError> {
        self.ensure_type(obj, &[ObjType::List, ObjType::Text])?;
        self.push_record(OpRecord::ListDelete {
            obj,
            index,
            id,
            actor,
            seq,
        });
        Ok(())
    }

    /// Reads the counter at `key` (as of `at` when given), adds `by`, and
    /// puts the result as a new counter version superseding the one it read.
    pub fn increment_map_counter(
        &mut self,
        obj: ObjId,
        key: &str,
        by: i64,
        id: OpId,
        actor: u32,
        seq: u64,
        at: Option<&Clock>,
    ) -> Result<(), OpSetError> {
        let current = self
            .get_map(obj, key, at)
            .and_then(|v| v.as_scalar().and_then(ScalarValue::as_counter))
            .ok_or_else(|| OpSetError::CounterNotFound(key.to_string()))?;
        let pred = self.visible_map_version_ids(obj, key, at);
        self.put_map_raw(
            obj,
            key,
            Value::Scalar(ScalarValue::Counter(current + by)),
            id,
            actor,
            seq,
            pred,
        )
    }

    /// Expands a text splice into `delete_count` deletes at `index` followed
    /// by one insert per char, each consuming one sequence number after
    /// `start_seq`. Returns the last sequence number consumed.
    pub fn splice_text(
        &mut self,
        obj: ObjId,
        index: usize,
        delete_count: usize,
        insert: &str,
        actor: u32,
        start_seq: u64,
    ) -> Result<u64, OpSetError> {
        self.ensure_type(obj, &[ObjType::Text])?;
        let mut seq = start_seq;
        let mut index = index;
        for _ in 0..delete_count {
            seq += 1;
            self.delete_list(obj, index, OpId::new(seq, actor), actor, seq)?;
        }
        for ch in insert.chars() {
            seq += 1;
            let value = Value::Scalar(ScalarValue::Str(ch.to_string()));
            self.insert_list(obj, index, value, OpId::new(seq, actor), actor, seq)?;
            index += 1;
        }
        Ok(seq)
    }

    pub fn add_mark(
        &mut self,
        obj: ObjId,
        start: usize,
        end: usize,
        name: &str,
        value: ScalarValue,
        id: OpId,
        actor: u32,
        seq: u64,
    ) -> Result<(), OpSetError> {
        self.ensure_type(obj, &[ObjType::Text])?;
        if end < start {
            return Err(OpSetError::InvalidIndex);
        }
        self.push_record(OpRecord::Mark {
            obj,
            start,
            end,
            name: name.to_string(),
            value,
            id,
            actor,
            seq,
        });
        Ok(())
    }

    pub fn get_map(&self, obj: ObjId, key: &str, at: Option<&Clock>) -> Option<Value> {
        let state = self.materialize(at);
        let slot = match state.get(&obj)? {
            ObjState::Map(entries) => entries.get(key)?,
            ObjState::Seq { .. } => return None,
        };
        sorted_versions(slot).pop().map(|v| v.value)
    }

    /// All surviving versions at the key, ascending by OpId (the last one is
    /// the LWW winner).
    pub fn get_all_map(&self, obj: ObjId, key: &str, at: Option<&Clock>) -> Vec<Value> {
        let state = self.materialize(at);
        let Some(ObjState::Map(entries)) = state.get(&obj) else {
            return Vec::new();
        };
        match entries.get(key) {
            Some(slot) => sorted_versions(slot).into_iter().map(|v| v.value).collect(),
            None => Vec::new(),
        }
    }

    pub fn keys_map(&self, obj: ObjId, at: Option<&Clock>) -> Vec<String> {
        let state = self.materialize(at);
        let Some(ObjState::Map(entries)) = state.get(&obj) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| !slot.versions.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn values_map(&self, obj: ObjId, at: Option<&Clock>) -> Vec<Value> {
        self.iter_map(obj, at).into_iter().map(|(_, v)| v).collect()
    }

    /// Key/winner pairs in ascending key order.
    pub fn iter_map(&self, obj: ObjId, at: Option<&Clock>) -> Vec<(String, Value)> {
        let state = self.materialize(at);
        let Some(ObjState::Map(entries)) = state.get(&obj) else {
            return Vec::new();
        };
        let mut out: Vec<(String, Value)> = entries
            .iter()
            .filter_map(|(k, slot)| {
                sorted_versions(slot).pop().map(|v| (k.clone(), v.value))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn list_len(&self, obj: ObjId, at: Option<&Clock>) -> usize {
        let state = self.materialize(at);
        match state.get(&obj) {
            Some(ObjState::Seq { elems, .. }) => elems.len(),
            _ => 0,
        }
    }

    /// Winning values for elements in `start..end`; `None` means to the end.
    pub fn list_range(
        &self,
        obj: ObjId,
        start: usize,
        end: Option<usize>,
        at: Option<&Clock>,
    ) -> Vec<Value> {
        let state = self.materialize(at);
        let Some(ObjState::Seq { elems, .. }) = state.get(&obj) else {
            return Vec::new();
        };
        let end = end.unwrap_or(elems.len()).min(elems.len());
        let start = start.min(end);
        elems[start..end]
            .iter()
            .filter_map(|slot| sorted_versions(slot).pop().map(|v| v.value))
            .collect()
    }

    pub fn text(&self, obj: ObjId, at: Option<&Clock>) -> String {
        let mut out = String::new();
        for v in self.list_range(obj, 0, None, at) {
            if let Some(s) = v.as_str() {
                out.push_str(s);
            }
        }
        out
    }

    /// Winning OpIds of the sequence elements, in element order. Used by
    /// cursor anchoring.
    pub fn sequence_element_ids(&self, obj: ObjId, at: Option<&Clock>) -> Vec<OpId> {
        let state = self.materialize(at);
        let Some(ObjState::Seq { elems, .. }) = state.get(&obj) else {
            return Vec::new();
        };
        elems
            .iter()
            .filter_map(|slot| sorted_versions(slot).pop().map(|v| v.id))
            .collect()
    }

    /// All marks active at the clock, sorted by (start, end, OpId).
    pub fn marks(&self, obj: ObjId, at: Option<&Clock>) -> Vec<Mark> {
        let state = self.materialize(at);
        let Some(ObjState::Seq { marks, .. }) = state.get(&obj) else {
            return Vec::new();
        };
        let mut out = marks.clone();
        out.sort_by(|a, b| {
            (a.start, a.end, a.id).cmp(&(b.start, b.end, b.id))
        });
        out
    }

    /// Marks covering `index` (start ≤ index < end). When several marks share
    /// a name the one with the larger OpId wins; output is sorted by
    /// (name, OpId).
    pub fn marks_at_index(&self, obj: ObjId, index: usize, at: Option<&Clock>) -> Vec<Mark> {
        let covering: Vec<Mark> = self
            .marks(obj, at)
            .into_iter()
            .filter(|m| m.start <= index && index < m.end)
            .collect();
        if covering.is_empty() {
            return Vec::new();
        }
        let mut by_name: HashMap<&str, &Mark> = HashMap::new();
        for m in &covering {
            match by_name.get(m.name.as_str()) {
                Some(cur) if cur.id >= m.id => {}
                _ => {
                    by_name.insert(&m.name, m);
                }
            }
        }
        let mut out: Vec<Mark> = by_name.into_values().cloned().collect();
        out.sort_by(|a, b| (a.name.as_str(), a.id).cmp(&(b.name.as_str(), b.id)));
        out
    }

    fn push_record(&mut self, rec: OpRecord) {
        apply_record_to_map_state(&mut self.current, &rec);
        self.ops.push(rec);
    }

    /// Replays the op log into fresh per-object states, restricted to the
    /// ops covered by `at` when present.
    ///
    /// Replay runs in ascending OpId order, not log-append order: replicas
    /// that hold the same op set materialize identically no matter how their
    /// logs interleaved local commits and remote ingests.
    fn materialize(&self, at: Option<&Clock>) -> HashMap<ObjId, ObjState> {
        let mut state: HashMap<ObjId, ObjState> = self
            .types
            .iter()
            .map(|(&id, &ty)| (id, ObjState::for_type(ty)))
            .collect();
        let mut order: Vec<usize> = (0..self.ops.len()).collect();
        order.sort_by_key(|&i| self.ops[i].id());
        for i in order {
            let op = &self.ops[i];
            if let Some(clock) = at {
                let (actor, seq) = op.actor_seq();
                if !clock.covers(actor, seq) {
                    continue;
                }
            }
            apply_record(&mut state, op);
        }
        state
    }

    fn current_map_version_ids(&self, obj: ObjId, key: &str) -> Vec<OpId> {
        let Some(ObjState::Map(entries)) = self.current.get(&obj) else {
            return Vec::new();
        };
        match entries.get(key) {
            Some(slot) => sorted_versions(slot).into_iter().map(|v| v.id).collect(),
            None => Vec::new(),
        }
    }

    /// Surviving version OpIds at the key, as of `at`; `None` reads the
    /// maintained current state. This is the predecessor set a superseding
    /// write should carry.
    pub(crate) fn visible_map_version_ids(
        &self,
        obj: ObjId,
        key: &str,
        at: Option<&Clock>,
    ) -> Vec<OpId> {
        let Some(clock) = at else {
            return self.current_map_version_ids(obj, key);
        };
        let state = self.materialize(Some(clock));
        let Some(ObjState::Map(entries)) = state.get(&obj) else {
            return Vec::new();
        };
        match entries.get(key) {
            Some(slot) => sorted_versions(slot).into_iter().map(|v| v.id).collect(),
            None => Vec::new(),
        }
    }

    fn visible_list_version_ids(&self, obj: ObjId, index: usize, at: Option<&Clock>) -> Vec<OpId> {
        let state = self.materialize(at);
        let Some(ObjState::Seq { elems, .. }) = state.get(&obj) else {
            return Vec::new();
        };
        match elems.get(index) {
            Some(slot) => sorted_versions(slot).into_iter().map(|v| v.id).collect(),
            None => Vec::new(),
        }
    }
}

/// The fast-path mirror only tracks map objects; list predecessors are
/// resolved against a full materialization.
fn apply_record_to_map_state(state: &mut HashMap<ObjId, ObjState>, op: &OpRecord) {
    match op {
        OpRecord::MapPut { .. } | OpRecord::MapDelete { .. } => apply_record(state, op),
        _ => {}
    }
}

fn apply_record(state: &mut HashMap<ObjId, ObjState>, op: &OpRecord) {
    match op {
        OpRecord::MapPut { obj, key, value, id, actor, seq, pred } => {
            let Some(ObjState::Map(entries)) = state.get_mut(obj) else {
                return;
            };
            let slot = entries.entry(key.clone()).or_default();
            remove_preds(&mut slot.versions, pred);
            slot.versions.push(VersionedValue {
                id: *id,
                actor: *actor,
                seq: *seq,
                value: value.clone(),
            });
        }
        OpRecord::MapDelete { obj, key, pred, .. } => {
            let Some(ObjState::Map(entries)) = state.get_mut(obj) else {
                return;
            };
            if let Some(slot) = entries.get_mut(key) {
                remove_preds(&mut slot.versions, pred);
            }
        }
        OpRecord::ListInsert { obj, index, value, id, actor, seq } => {
            let Some(ObjState::Seq { elems, .. }) = state.get_mut(obj) else {
                return;
            };
            if *index > elems.len() {
                return;
            }
            elems.insert(
                *index,
                Slot {
                    versions: vec![VersionedValue {
                        id: *id,
                        actor: *actor,
                        seq: *seq,
                        value: value.clone(),
                    }],
                },
            );
        }
        OpRecord::ListSet { obj, index, value, id, actor, seq, pred } => {
            let Some(ObjState::Seq { elems, .. }) = state.get_mut(obj) else {
                return;
            };
            let Some(slot) = elems.get_mut(*index) else {
                return;
            };
            remove_preds(&mut slot.versions, pred);
            slot.versions.push(VersionedValue {
                id: *id,
                actor: *actor,
                seq: *seq,
                value: value.clone(),
            });
        }
        OpRecord::ListDelete { obj, index, .. } => {
            let Some(ObjState::Seq { elems, .. }) = state.get_mut(obj) else {
                return;
            };
            if *index < elems.len() {
                elems.remove(*index);
            }
        }
        OpRecord::Mark { obj, start, end, name, value, id, actor, seq } => {
            let Some(ObjState::Seq { marks, .. }) = state.get_mut(obj) else {
                return;
            };
            marks.push(Mark {
                start: *start,
                end: *end,
                name: name.clone(),
                value: value.clone(),
                id: *id,
                actor: *actor,
                seq: *seq,
            });
        }
    }
}

fn remove_preds(versions: &mut Vec<VersionedValue>, pred: &[OpId]) {
    if pred.is_empty() {
        return;
    }
    versions.retain(|v| !pred.contains(&v.id));
}

fn sorted_versions(slot: &Slot) -> Vec<VersionedValue> {
    let mut out = slot.versions.clone();
    out.sort_by_key(|v| v.id);
    out
}
