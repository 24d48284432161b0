//! Save/Load: the persistence adapter over the chunk container.
//!
//! A saved document is one Document chunk holding every reachable change in
//! dependency-first order, optionally followed by one Change chunk per
//! still-queued orphan. Change payloads are JSON DTOs with a fixed field
//! order, so saving an unchanged document returns byte-identical output (and
//! is additionally served from a cache keyed by the save options).

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use conflux_storage::chunk::{self, ChunkError, ChunkType};
use conflux_storage::legacy;

use crate::change::{Change, ChangeOp};
use crate::document::{DocError, Document, SaveCacheKey};
use crate::ids::{ChangeHash, ObjId, OpId};
use crate::value::{ObjType, ScalarValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnPartialLoad {
    #[default]
    Error,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationMode {
    #[default]
    Check,
    DontCheck,
}

/// Reserved load-time migration switch; both values are currently no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringMigration {
    #[default]
    None,
    ConvertToText,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub on_partial_load: OnPartialLoad,
    pub verification: VerificationMode,
    pub string_migration: StringMigration,
}

#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    pub deflate: bool,
    /// When false, queued changes whose dependencies never arrived are
    /// silently dropped from the output.
    pub retain_orphans: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            deflate: true,
            retain_orphans: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DocumentDto {
    changes: Vec<ChangeDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChangeDto {
    hash: String,
    actor: u32,
    seq: u64,
    start_op: u64,
    max_op: u64,
    deps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    time: Option<i64>,
    operations: Vec<ChangeOpDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChangeOpDto {
    kind: u8,
    obj_id: ObjIdDto,
    child_obj_id: ObjIdDto,
    key: String,
    index: usize,
    start: usize,
    end: usize,
    mark_name: String,
    value: ScalarDto,
    obj_type: u8,
    by: i64,
    delete_count: usize,
    insert_text: String,
    op_id: OpIdDto,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct ObjIdDto {
    root: bool,
    counter: u64,
    actor: u32,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct OpIdDto {
    counter: u64,
    actor: u32,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct ScalarDto {
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    bytes: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    int: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    uint: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    f64: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    counter: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    bool: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    type_code: Option<u8>,
}

impl Document {
    pub fn save(&mut self) -> Result<Vec<u8>, DocError> {
        self.save_with(SaveOptions::default())
    }

    pub fn save_no_compress(&mut self) -> Result<Vec<u8>, DocError> {
        self.save_with(SaveOptions {
            deflate: false,
            ..Default::default()
        })
    }

    pub fn save_with(&mut self, opts: SaveOptions) -> Result<Vec<u8>, DocError> {
        if let Some(raw) = &self.legacy_raw {
            if self.changes.is_empty() {
                return Ok(raw.clone());
            }
        }
        let key = SaveCacheKey {
            deflate: opts.deflate,
            retain_orphans: opts.retain_orphans,
        };
        if self.queue.is_empty() {
            if let Some(cached) = self.save_cache.get(&key) {
                return Ok(cached.clone());
            }
        }

        let dto = DocumentDto {
            changes: self.all_changes().iter().map(encode_change).collect(),
        };
        let payload = serde_json::to_vec(&dto)?;
        let mut buf = chunk::encode_chunk(ChunkType::Document, &payload, opts.deflate)?;

        if opts.retain_orphans {
            for q in &self.queue {
                let payload = serde_json::to_vec(&encode_change(q))?;
                buf.extend(chunk::encode_chunk(ChunkType::Change, &payload, opts.deflate)?);
            }
        }

        if self.queue.is_empty() {
            self.save_cache.insert(key, buf.clone());
        }
        Ok(buf)
    }

    /// Incremental save: one uncompressed Change chunk for every applied
    /// change not reachable from `heads`.
    pub fn save_after(&self, heads: &[ChangeHash]) -> Result<Vec<u8>, DocError> {
        let mut base: Vec<ChangeHash> = Vec::new();
        if !heads.is_empty() {
            base = self.graph.hashes_from_heads(heads)?;
        }
        let current = self.graph.hashes_from_heads(&self.heads())?;
        let mut out = Vec::new();
        for h in current {
            if base.contains(&h) {
                continue;
            }
            let Some(c) = self.changes.get(&h) else {
                continue;
            };
            let payload = serde_json::to_vec(&encode_change(c))?;
            out.extend(chunk::encode_chunk(ChunkType::Change, &payload, false)?);
        }
        Ok(out)
    }

    pub fn load(data: &[u8]) -> Result<Document, DocError> {
        Self::load_with(data, LoadOptions::default())
    }

    pub fn load_with(data: &[u8], opts: LoadOptions) -> Result<Document, DocError> {
        let mut doc = Document::new();
        if data.is_empty() {
            return Ok(doc);
        }

        let chunks = match chunk::parse_chunks(data) {
            Ok(chunks) => chunks,
            // Body corruption is always reported, regardless of mode.
            Err(ChunkError::BadChecksum) => return Err(ChunkError::BadChecksum.into()),
            Err(err) => {
                if legacy::is_legacy(data) {
                    match legacy::parse_legacy_chunks(data) {
                        Ok(_) => {
                            debug!(len = data.len(), "preserving legacy document bytes");
                            doc.legacy_raw = Some(data.to_vec());
                            return Ok(doc);
                        }
                        Err(lerr) => {
                            if opts.on_partial_load == OnPartialLoad::Ignore {
                                return Ok(doc);
                            }
                            return Err(lerr.into());
                        }
                    }
                }
                if opts.on_partial_load == OnPartialLoad::Ignore {
                    warn!(%err, "ignoring undecodable document bytes");
                    return Ok(doc);
                }
                return Err(err.into());
            }
        };

        for ch in chunks {
            let decoded = match ch.header.ty {
                ChunkType::Document | ChunkType::Bundle => {
                    serde_json::from_slice::<DocumentDto>(&ch.payload)
                        .map(|dto| dto.changes)
                }
                ChunkType::Change | ChunkType::CompressedChange => {
                    serde_json::from_slice::<ChangeDto>(&ch.payload).map(|dto| vec![dto])
                }
            };
            let dtos = match decoded {
                Ok(dtos) => dtos,
                Err(err) => {
                    if opts.on_partial_load == OnPartialLoad::Ignore {
                        warn!(%err, "skipping undecodable chunk payload");
                        continue;
                    }
                    return Err(err.into());
                }
            };
            let changes = decode_changes(dtos)?;
            if let Err(err) = doc.apply_changes(changes) {
                if opts.on_partial_load == OnPartialLoad::Ignore {
                    warn!(%err, "skipping chunk that failed to apply");
                    continue;
                }
                return Err(DocError::PartialLoad(err.to_string()));
            }
        }

        if opts.verification == VerificationMode::Check {
            doc.graph.validate()?;
        }
        Ok(doc)
    }

    /// Loads `data` as a standalone document and folds its changes into this
    /// one, returning how many new heads that produced.
    pub fn load_incremental(&mut self, data: &[u8]) -> Result<usize, DocError> {
        let before = self.heads().len();
        let loaded = Self::load_with(
            data,
            LoadOptions {
                on_partial_load: OnPartialLoad::Ignore,
                ..Default::default()
            },
        )?;
        self.apply_changes(loaded.all_changes())?;
        let after = self.heads().len();
        Ok(after.saturating_sub(before))
    }
}

pub(crate) fn encode_change(c: &Change) -> ChangeDto {
    ChangeDto {
        hash: c.hash.to_string(),
        actor: c.actor,
        seq: c.seq,
        start_op: c.start_op,
        max_op: c.max_op,
        deps: c.deps.iter().map(ChangeHash::to_string).collect(),
        message: c.message.clone(),
        time: c.time,
        operations: c.ops.iter().map(encode_op).collect(),
    }
}

pub(crate) fn encode_changes(changes: &[Change]) -> Vec<ChangeDto> {
    changes.iter().map(encode_change).collect()
}

pub(crate) fn decode_changes(dtos: Vec<ChangeDto>) -> Result<Vec<Change>, DocError> {
    dtos.into_iter().map(decode_change).collect()
}

pub(crate) fn to_json_bytes(dtos: &[ChangeDto]) -> Result<Vec<u8>, DocError> {
    Ok(serde_json::to_vec(dtos)?)
}

pub(crate) fn from_json_bytes(data: &[u8]) -> Result<Vec<ChangeDto>, DocError> {
    Ok(serde_json::from_slice(data)?)
}

fn decode_change(dto: ChangeDto) -> Result<Change, DocError> {
    let hash = ChangeHash::from_hex(&dto.hash)?;
    let deps = dto
        .deps
        .iter()
        .map(|d| ChangeHash::from_hex(d))
        .collect::<Result<Vec<_>, _>>()?;
    let ops = dto
        .operations
        .into_iter()
        .map(decode_op)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Change {
        hash,
        actor: dto.actor,
        seq: dto.seq,
        start_op: dto.start_op,
        max_op: dto.max_op,
        deps,
        message: dto.message,
        time: dto.time,
        ops,
    })
}

fn encode_op(op: &ChangeOp) -> ChangeOpDto {
    let (delete_count, insert_text) = op.splice().unwrap_or((0, ""));
    let (start, end, mark_name) = op.mark().unwrap_or((0, 0, ""));
    ChangeOpDto {
        kind: op.kind(),
        obj_id: encode_obj_id(op.obj()),
        child_obj_id: op.child().map(encode_obj_id).unwrap_or_default(),
        key: op.key().unwrap_or("").to_string(),
        index: op.index().unwrap_or(0),
        start,
        end,
        mark_name: mark_name.to_string(),
        value: op.value().map(encode_scalar).unwrap_or_default(),
        obj_type: op.obj_type().map(|t| t as u8).unwrap_or(0),
        by: op.by().unwrap_or(0),
        delete_count,
        insert_text: insert_text.to_string(),
        op_id: OpIdDto {
            counter: op.id().counter,
            actor: op.id().actor,
        },
    }
}

fn decode_op(dto: ChangeOpDto) -> Result<ChangeOp, DocError> {
    let id = OpId::new(dto.op_id.counter, dto.op_id.actor);
    let obj = decode_obj_id(&dto.obj_id);
    let op = match dto.kind {
        0 => ChangeOp::Put {
            id,
            obj,
            key: dto.key,
            value: decode_scalar(dto.value)?,
        },
        1 => ChangeOp::PutObject {
            id,
            obj,
            key: dto.key,
            ty: decode_obj_type(dto.obj_type)?,
            child: decode_obj_id(&dto.child_obj_id),
        },
        2 => ChangeOp::Insert {
            id,
            obj,
            index: dto.index,
            value: decode_scalar(dto.value)?,
        },
        3 => ChangeOp::InsertObject {
            id,
            obj,
            index: dto.index,
            ty: decode_obj_type(dto.obj_type)?,
            child: decode_obj_id(&dto.child_obj_id),
        },
        4 => ChangeOp::DeleteMap {
            id,
            obj,
            key: dto.key,
        },
        5 => ChangeOp::DeleteList {
            id,
            obj,
            index: dto.index,
        },
        6 => ChangeOp::Increment {
            id,
            obj,
            key: dto.key,
            by: dto.by,
        },
        7 => ChangeOp::SpliceText {
            id,
            obj,
            index: dto.index,
            delete_count: dto.delete_count,
            insert: dto.insert_text,
        },
        8 => ChangeOp::Mark {
            id,
            obj,
            start: dto.start,
            end: dto.end,
            name: dto.mark_name,
            value: decode_scalar(dto.value)?,
        },
        _ => return Err(DocError::InvalidChangeDto("unknown operation kind")),
    };
    Ok(op)
}

fn encode_obj_id(id: ObjId) -> ObjIdDto {
    match id {
        ObjId::Root => ObjIdDto {
            root: true,
            counter: 0,
            actor: 0,
        },
        ObjId::Op(op) => ObjIdDto {
            root: false,
            counter: op.counter,
            actor: op.actor,
        },
    }
}

fn decode_obj_id(dto: &ObjIdDto) -> ObjId {
    if dto.root {
        ObjId::Root
    } else {
        ObjId::Op(OpId::new(dto.counter, dto.actor))
    }
}

fn decode_obj_type(v: u8) -> Result<ObjType, DocError> {
    ObjType::from_u8(v).ok_or(DocError::InvalidChangeDto("unknown object type"))
}

fn encode_scalar(v: &ScalarValue) -> ScalarDto {
    let mut dto = ScalarDto {
        kind: v.kind(),
        ..Default::default()
    };
    match v {
        ScalarValue::Null => {}
        ScalarValue::Bytes(b) => dto.bytes = Some(b.clone()),
        ScalarValue::Str(s) => dto.string = Some(s.clone()),
        ScalarValue::Int(i) => dto.int = Some(*i),
        ScalarValue::Uint(u) => dto.uint = Some(*u),
        ScalarValue::F64(f) => dto.f64 = Some(*f),
        ScalarValue::Counter(c) => dto.counter = Some(*c),
        ScalarValue::Timestamp(t) => dto.time = Some(*t),
        ScalarValue::Boolean(b) => dto.bool = Some(*b),
        ScalarValue::Unknown { type_code, bytes } => {
            dto.type_code = Some(*type_code);
            dto.bytes = Some(bytes.clone());
        }
    }
    dto
}

fn decode_scalar(dto: ScalarDto) -> Result<ScalarValue, DocError> {
    let v = match dto.kind {
        0 => ScalarValue::Null,
        1 => ScalarValue::Bytes(dto.bytes.unwrap_or_default()),
        2 => ScalarValue::Str(dto.string.unwrap_or_default()),
        3 => ScalarValue::Int(dto.int.unwrap_or_default()),
        4 => ScalarValue::Uint(dto.uint.unwrap_or_default()),
        5 => ScalarValue::F64(dto.f64.unwrap_or_default()),
        6 => ScalarValue::Counter(dto.counter.unwrap_or_default()),
        7 => ScalarValue::Timestamp(dto.time.unwrap_or_default()),
        8 => ScalarValue::Boolean(dto.bool.unwrap_or_default()),
        9 => ScalarValue::Unknown {
            type_code: dto.type_code.unwrap_or_default(),
            bytes: dto.bytes.unwrap_or_default(),
        },
        _ => return Err(DocError::InvalidChangeDto("unknown scalar kind")),
    };
    Ok(v)
}
