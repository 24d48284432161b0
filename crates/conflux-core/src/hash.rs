//! The change hasher: a domain-tagged streaming SHA-256 writer.
//!
//! Every field written into the digest is preceded by a type tag, and
//! variable-length data by a big-endian u64 length, so no two distinct field
//! sequences can collide by concatenation. The 32-byte digest IS the change
//! hash.

use sha2::{Digest, Sha256};

use crate::change::ChangeOp;
use crate::ids::{ActorId, ChangeHash, ObjId, OpId};
use crate::value::ScalarValue;

const TAG_ACTOR_ID: u8 = 0x01;
const TAG_CHANGE_HASH: u8 = 0x02;
const TAG_OP_ID: u8 = 0x03;
const TAG_OBJ_ID: u8 = 0x04;
const TAG_STRING: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;
const TAG_BOOL: u8 = 0x07;
const TAG_U64: u8 = 0x08;
const TAG_I64: u8 = 0x09;

/// The domain tag prefixed to every change digest.
pub const CHANGE_DOMAIN_TAG: &str = "am-change-v1";

/// Operations that carry no child object hash the non-root zero id instead.
const NO_CHILD: ObjId = ObjId::Op(OpId::new(0, 0));

#[derive(Default)]
pub struct ChangeHasher {
    h: Sha256,
}

impl ChangeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_tag(&mut self, tag: u8) {
        self.h.update([tag]);
    }

    fn write_len(&mut self, n: usize) {
        self.h.update((n as u64).to_be_bytes());
    }

    pub fn write_actor_id(&mut self, id: &ActorId) {
        self.write_tag(TAG_ACTOR_ID);
        self.write_len(id.as_bytes().len());
        self.h.update(id.as_bytes());
    }

    pub fn write_change_hash(&mut self, hash: ChangeHash) {
        self.write_tag(TAG_CHANGE_HASH);
        self.h.update(hash.as_bytes());
    }

    pub fn write_op_id(&mut self, id: OpId) {
        self.write_tag(TAG_OP_ID);
        self.write_u64(id.counter);
        self.write_u64(id.actor as u64);
    }

    pub fn write_obj_id(&mut self, id: ObjId) {
        self.write_tag(TAG_OBJ_ID);
        match id {
            ObjId::Root => self.write_bool(true),
            ObjId::Op(op) => {
                self.write_bool(false);
                self.write_op_id(op);
            }
        }
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_tag(TAG_STRING);
        self.write_len(s.len());
        self.h.update(s.as_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.write_tag(TAG_BYTES);
        self.write_len(v.len());
        self.h.update(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_tag(TAG_BOOL);
        self.h.update([v as u8]);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_tag(TAG_U64);
        self.h.update(v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_tag(TAG_I64);
        self.h.update((v as u64).to_be_bytes());
    }

    pub fn finish(self) -> ChangeHash {
        ChangeHash(self.h.finalize().into())
    }
}

/// Computes the content address of a change from exactly the fields that
/// define it; see the module docs for the framing rules.
pub fn compute_change_hash(
    actor: u32,
    seq: u64,
    start_op: u64,
    max_op: u64,
    deps: &[ChangeHash],
    message: Option<&str>,
    time: Option<i64>,
    ops: &[ChangeOp],
) -> ChangeHash {
    let mut h = ChangeHasher::new();
    h.write_str(CHANGE_DOMAIN_TAG);
    h.write_u64(actor as u64);
    h.write_u64(seq);
    h.write_u64(start_op);
    h.write_u64(max_op);
    h.write_u64(deps.len() as u64);
    for d in deps {
        h.write_change_hash(*d);
    }
    match message {
        Some(m) => {
            h.write_bool(true);
            h.write_str(m);
        }
        None => h.write_bool(false),
    }
    match time {
        Some(t) => {
            h.write_bool(true);
            h.write_i64(t);
        }
        None => h.write_bool(false),
    }
    h.write_u64(ops.len() as u64);
    for op in ops {
        let (delete_count, insert_text) = op.splice().unwrap_or((0, ""));
        let (start, end, mark_name) = op.mark().unwrap_or((0, 0, ""));
        h.write_u64(op.kind() as u64);
        h.write_obj_id(op.obj());
        h.write_obj_id(op.child().unwrap_or(NO_CHILD));
        h.write_str(op.key().unwrap_or(""));
        h.write_i64(op.index().unwrap_or(0) as i64);
        h.write_i64(op.by().unwrap_or(0));
        h.write_i64(delete_count as i64);
        h.write_str(insert_text);
        h.write_i64(start as i64);
        h.write_i64(end as i64);
        h.write_str(mark_name);
        h.write_u64(op.obj_type().map(|t| t as u64).unwrap_or(0));
        h.write_op_id(op.id());
        let value = op.value().unwrap_or(&ScalarValue::Null);
        h.write_u64(value.kind() as u64);
        match value {
            ScalarValue::Str(s) => h.write_str(s),
            ScalarValue::Int(v) => h.write_i64(*v),
            ScalarValue::Uint(v) => h.write_u64(*v),
            ScalarValue::Counter(v) => h.write_i64(*v),
            ScalarValue::Timestamp(v) => h.write_i64(*v),
            ScalarValue::Boolean(v) => h.write_bool(*v),
            ScalarValue::Bytes(b) => {
                h.write_bytes(b);
                h.write_u64(0);
            }
            ScalarValue::Unknown { type_code, bytes } => {
                h.write_bytes(bytes);
                h.write_u64(*type_code as u64);
            }
            ScalarValue::F64(v) => h.write_u64(v.to_bits()),
            ScalarValue::Null => h.write_str("null"),
        }
    }
    h.finish()
}

/// Hashes a string map independently of iteration order.
pub fn hash_string_map(map: &std::collections::HashMap<String, String>) -> ChangeHash {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    let mut h = ChangeHasher::new();
    h.write_u64(keys.len() as u64);
    for k in keys {
        h.write_str(k);
        h.write_str(&map[k]);
    }
    h.finish()
}
