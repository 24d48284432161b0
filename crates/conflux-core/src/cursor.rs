//! Stable anchors into text sequences.
//!
//! A cursor records the OpId of the element it sits after (or before, at the
//! very start) instead of a raw index, so it survives concurrent edits. If
//! the anchored element is deleted, resolution falls back to the recorded
//! char index clamped to the current length.

use crate::clock::Clock;
use crate::document::{DocError, Document};
use crate::ids::{ChangeHash, ObjId, OpId};
use crate::opset::OpSetError;
use crate::text::{self, Encoding};
use crate::value::ObjType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorSide {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub obj: ObjId,
    pub anchor: Option<OpId>,
    pub side: CursorSide,
    pub fallback_char: usize,
}

impl Document {
    pub fn cursor_for_text(
        &self,
        obj: ObjId,
        index: usize,
        enc: Encoding,
    ) -> Result<Cursor, DocError> {
        self.cursor_for_text_clock(obj, index, enc, None)
    }

    pub fn cursor_for_text_at(
        &self,
        obj: ObjId,
        index: usize,
        enc: Encoding,
        heads: &[ChangeHash],
    ) -> Result<Cursor, DocError> {
        let clock = self.clock_at(heads)?;
        self.cursor_for_text_clock(obj, index, enc, Some(&clock))
    }

    pub fn resolve_text_cursor(&self, cursor: &Cursor, enc: Encoding) -> Result<usize, DocError> {
        self.resolve_text_cursor_clock(cursor, enc, None)
    }

    pub fn resolve_text_cursor_at(
        &self,
        cursor: &Cursor,
        enc: Encoding,
        heads: &[ChangeHash],
    ) -> Result<usize, DocError> {
        let clock = self.clock_at(heads)?;
        self.resolve_text_cursor_clock(cursor, enc, Some(&clock))
    }

    fn ensure_text(&self, obj: ObjId) -> Result<(), DocError> {
        let ty = self
            .ops
            .object_type(obj)
            .ok_or(OpSetError::UnknownObject(obj))?;
        if ty != ObjType::Text {
            return Err(OpSetError::WrongObjectType(ty).into());
        }
        Ok(())
    }

    fn cursor_for_text_clock(
        &self,
        obj: ObjId,
        index: usize,
        enc: Encoding,
        at: Option<&Clock>,
    ) -> Result<Cursor, DocError> {
        self.ensure_text(obj)?;
        let txt = self.ops.text(obj, at);
        let norm = text::normalize_index(&txt, index, enc);
        let char_index = match enc {
            Encoding::Utf16 => text::utf16_index_to_char(&txt, norm),
            Encoding::Utf8 => norm,
        };
        let ids = self.ops.sequence_element_ids(obj, at);
        if ids.is_empty() {
            return Ok(Cursor {
                obj,
                anchor: None,
                side: CursorSide::After,
                fallback_char: 0,
            });
        }
        if char_index == 0 {
            return Ok(Cursor {
                obj,
                anchor: Some(ids[0]),
                side: CursorSide::Before,
                fallback_char: 0,
            });
        }
        if char_index >= ids.len() {
            return Ok(Cursor {
                obj,
                anchor: Some(ids[ids.len() - 1]),
                side: CursorSide::After,
                fallback_char: ids.len(),
            });
        }
        Ok(Cursor {
            obj,
            anchor: Some(ids[char_index - 1]),
            side: CursorSide::After,
            fallback_char: char_index,
        })
    }

    fn resolve_text_cursor_clock(
        &self,
        cursor: &Cursor,
        enc: Encoding,
        at: Option<&Clock>,
    ) -> Result<usize, DocError> {
        self.ensure_text(cursor.obj)?;
        let ids = self.ops.sequence_element_ids(cursor.obj, at);
        let mut char_index = cursor.fallback_char;
        if let Some(anchor) = cursor.anchor {
            if let Some(pos) = ids.iter().position(|&id| id == anchor) {
                char_index = match cursor.side {
                    CursorSide::Before => pos,
                    CursorSide::After => pos + 1,
                };
            }
        }
        char_index = char_index.min(ids.len());
        if enc == Encoding::Utf16 {
            let txt = self.ops.text(cursor.obj, at);
            return Ok(text::char_index_to_utf16(&txt, char_index));
        }
        Ok(char_index)
    }
}
