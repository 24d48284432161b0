//! Structural diff between two sets of heads.
//!
//! The walk starts at root and recurses into a nested object only when both
//! sides reference the same child id. Text and list differences are reported
//! coarsely (full before/after); splice refinement is the consumer's concern.

use std::collections::HashSet;

use crate::clock::Clock;
use crate::document::{DocError, Document};
use crate::ids::{ChangeHash, ObjId};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    MapPut { obj: ObjId, key: String, old: Option<Value>, new: Value },
    MapDelete { obj: ObjId, key: String, old: Value },
    TextSplice { obj: ObjId, before: String, after: String },
    ListReplace { obj: ObjId, before: Vec<Value>, after: Vec<Value> },
}

/// Records patches across commits for the incremental-diff flow. An inactive
/// log swallows everything.
#[derive(Debug, Clone, Default)]
pub struct PatchLog {
    active: bool,
    patches: Vec<Patch>,
    heads: Vec<ChangeHash>,
}

impl PatchLog {
    pub fn active() -> Self {
        PatchLog {
            active: true,
            ..Default::default()
        }
    }

    pub fn inactive() -> Self {
        PatchLog::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reset(&mut self) {
        self.patches.clear();
        self.heads.clear();
    }

    pub fn add(&mut self, patch: Patch) {
        if self.active {
            self.patches.push(patch);
        }
    }

    pub fn make_patches(&self) -> Vec<Patch> {
        self.patches.clone()
    }

    pub fn heads(&self) -> Vec<ChangeHash> {
        self.heads.clone()
    }

    fn set_heads(&mut self, heads: &[ChangeHash]) {
        self.heads = heads.to_vec();
    }
}

impl Document {
    /// Diffs root recursively between two head sets, swallowing clock errors
    /// into an empty patch list.
    pub fn diff(&self, before_heads: &[ChangeHash], after_heads: &[ChangeHash]) -> Vec<Patch> {
        self.diff_obj(ObjId::Root, before_heads, after_heads, true)
            .unwrap_or_default()
    }

    pub fn diff_to_patch_log(
        &self,
        before_heads: &[ChangeHash],
        after_heads: &[ChangeHash],
        log: &mut PatchLog,
    ) {
        if !log.is_active() {
            return;
        }
        for p in self.diff(before_heads, after_heads) {
            log.add(p);
        }
        log.set_heads(after_heads);
    }

    pub fn diff_obj(
        &self,
        obj: ObjId,
        before_heads: &[ChangeHash],
        after_heads: &[ChangeHash],
        recursive: bool,
    ) -> Result<Vec<Patch>, DocError> {
        let before = self.clock_at(before_heads)?;
        let after = self.clock_at(after_heads)?;
        let mut seen = HashSet::new();
        self.diff_obj_at(obj, &before, &after, recursive, &mut seen)
    }

    fn diff_obj_at(
        &self,
        obj: ObjId,
        before: &Clock,
        after: &Clock,
        recursive: bool,
        seen: &mut HashSet<ObjId>,
    ) -> Result<Vec<Patch>, DocError> {
        if !seen.insert(obj) {
            return Ok(Vec::new());
        }
        let ty = self
            .ops
            .object_type(obj)
            .ok_or(DocError::DiffUnknownObject)?;
        match ty {
            crate::value::ObjType::Map => self.diff_map(obj, before, after, recursive, seen),
            crate::value::ObjType::Text => {
                let before_text = self.ops.text(obj, Some(before));
                let after_text = self.ops.text(obj, Some(after));
                if before_text == after_text {
                    return Ok(Vec::new());
                }
                Ok(vec![Patch::TextSplice {
                    obj,
                    before: before_text,
                    after: after_text,
                }])
            }
            crate::value::ObjType::List => {
                let before_list = self.ops.list_range(obj, 0, None, Some(before));
                let after_list = self.ops.list_range(obj, 0, None, Some(after));
                if before_list == after_list {
                    return Ok(Vec::new());
                }
                Ok(vec![Patch::ListReplace {
                    obj,
                    before: before_list,
                    after: after_list,
                }])
            }
        }
    }

    fn diff_map(
        &self,
        obj: ObjId,
        before: &Clock,
        after: &Clock,
        recursive: bool,
        seen: &mut HashSet<ObjId>,
    ) -> Result<Vec<Patch>, DocError> {
        let before_map = self.ops.iter_map(obj, Some(before));
        let after_map = self.ops.iter_map(obj, Some(after));

        let mut keys: Vec<&String> = before_map.iter().chain(&after_map).map(|(k, _)| k).collect();
        keys.sort();
        keys.dedup();

        let lookup = |map: &[(String, Value)], key: &str| -> Option<Value> {
            map.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        };

        let mut patches = Vec::new();
        for key in keys {
            let bv = lookup(&before_map, key);
            let av = lookup(&after_map, key);
            match (&bv, &av) {
                (Some(old), None) => patches.push(Patch::MapDelete {
                    obj,
                    key: key.clone(),
                    old: old.clone(),
                }),
                (None, Some(new)) => patches.push(Patch::MapPut {
                    obj,
                    key: key.clone(),
                    old: None,
                    new: new.clone(),
                }),
                (Some(old), Some(new)) if old != new => patches.push(Patch::MapPut {
                    obj,
                    key: key.clone(),
                    old: Some(old.clone()),
                    new: new.clone(),
                }),
                _ => {}
            }
            if recursive {
                if let (Some(Value::Object { id: bid, .. }), Some(Value::Object { id: aid, .. })) =
                    (&bv, &av)
                {
                    if bid == aid {
                        patches.extend(self.diff_obj_at(*bid, before, after, true, seen)?);
                    }
                }
            }
        }
        Ok(patches)
    }
}
