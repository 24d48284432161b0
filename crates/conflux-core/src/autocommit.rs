//! One-mutation-per-change convenience wrapper around [`Document`], plus an
//! incremental diff cursor for observers that render patches.

use crate::change::Change;
use crate::diff::Patch;
use crate::document::{DocError, Document};
use crate::ids::{ChangeHash, ObjId};
use crate::value::{ObjType, ScalarValue};

#[derive(Debug, Default)]
pub struct AutoCommit {
    doc: Document,
    diff_cursor: Vec<ChangeHash>,
}

impl AutoCommit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn set_actor(&mut self, actor: u32) -> Result<(), DocError> {
        self.doc.set_actor(actor)
    }

    pub fn diff(&self, before: &[ChangeHash], after: &[ChangeHash]) -> Vec<Patch> {
        self.doc.diff(before, after)
    }

    pub fn diff_cursor(&self) -> Vec<ChangeHash> {
        self.diff_cursor.clone()
    }

    pub fn update_diff_cursor(&mut self) {
        self.diff_cursor = self.doc.heads();
    }

    pub fn reset_diff_cursor(&mut self) {
        self.diff_cursor.clear();
    }

    /// Patches since the cursor position; advances the cursor to the current
    /// heads.
    pub fn diff_incremental(&mut self) -> Vec<Patch> {
        let after = self.doc.heads();
        let patches = self.doc.diff(&self.diff_cursor, &after);
        self.diff_cursor = after;
        patches
    }

    pub fn put(
        &mut self,
        obj: ObjId,
        key: &str,
        value: ScalarValue,
    ) -> Result<Option<Change>, DocError> {
        let mut tx = self.doc.begin()?;
        tx.put(obj, key, value);
        tx.commit()
    }

    pub fn put_object(
        &mut self,
        obj: ObjId,
        key: &str,
        ty: ObjType,
    ) -> Result<(ObjId, Option<Change>), DocError> {
        let mut tx = self.doc.begin()?;
        let child = tx.put_object(obj, key, ty);
        let change = tx.commit()?;
        Ok((child, change))
    }

    pub fn insert(
        &mut self,
        obj: ObjId,
        index: usize,
        value: ScalarValue,
    ) -> Result<Option<Change>, DocError> {
        let mut tx = self.doc.begin()?;
        tx.insert(obj, index, value);
        tx.commit()
    }

    pub fn insert_object(
        &mut self,
        obj: ObjId,
        index: usize,
        ty: ObjType,
    ) -> Result<(ObjId, Option<Change>), DocError> {
        let mut tx = self.doc.begin()?;
        let child = tx.insert_object(obj, index, ty);
        let change = tx.commit()?;
        Ok((child, change))
    }

    pub fn delete_map(&mut self, obj: ObjId, key: &str) -> Result<Option<Change>, DocError> {
        let mut tx = self.doc.begin()?;
        tx.delete_map(obj, key);
        tx.commit()
    }

    pub fn delete_list(&mut self, obj: ObjId, index: usize) -> Result<Option<Change>, DocError> {
        let mut tx = self.doc.begin()?;
        tx.delete_list(obj, index);
        tx.commit()
    }

    pub fn increment(&mut self, obj: ObjId, key: &str, by: i64) -> Result<Option<Change>, DocError> {
        let mut tx = self.doc.begin()?;
        tx.increment(obj, key, by);
        tx.commit()
    }

    pub fn splice_text(
        &mut self,
        obj: ObjId,
        index: usize,
        delete_count: usize,
        insert: &str,
    ) -> Result<Option<Change>, DocError> {
        let mut tx = self.doc.begin()?;
        tx.splice_text(obj, index, delete_count, insert);
        tx.commit()
    }

    pub fn mark(
        &mut self,
        obj: ObjId,
        start: usize,
        end: usize,
        name: &str,
        value: ScalarValue,
    ) -> Result<Option<Change>, DocError> {
        let mut tx = self.doc.begin()?;
        tx.mark(obj, start, end, name, value)?;
        tx.commit()
    }
}
