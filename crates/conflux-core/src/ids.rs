//! Identifier algebra: actors, operations, objects, and change hashes.
//!
//! All four identifier kinds carry total orders; everything deterministic in
//! the engine (head sets, dependency lists, materialization tie-breaks)
//! bottoms out in these comparisons.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("invalid change hash length: got {0}")]
    InvalidChangeHashLength(usize),
    #[error("invalid hex input")]
    InvalidHex,
}

/// The author identity of changes, as an opaque byte string.
///
/// Ordered lexicographically. The persisted form of the engine uses the
/// compact `u32` actor index carried by [`OpId`]; this representation exists
/// for interop surfaces that exchange full actor identifiers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActorId(Vec<u8>);

impl ActorId {
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        ActorId(raw.into())
    }

    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        Ok(ActorId(decode_hex(s)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

/// A 32-byte content address of a change, ordered by unsigned byte compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChangeHash(pub [u8; 32]);

impl ChangeHash {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; 32] = raw
            .try_into()
            .map_err(|_| IdError::InvalidChangeHashLength(raw.len()))?;
        Ok(ChangeHash(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        Self::from_bytes(&decode_hex(s)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

/// Identifies one operation: a Lamport counter plus the actor index.
///
/// The derived order (counter first, actor as tie-break) is the LWW order of
/// the whole engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OpId {
    pub counter: u64,
    pub actor: u32,
}

impl OpId {
    pub const fn new(counter: u64, actor: u32) -> Self {
        OpId { counter, actor }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.actor)
    }
}

/// Identifies an object in the document tree: the root sentinel or the
/// operation that created the object. Root sorts before all non-root ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjId {
    Root,
    Op(OpId),
}

impl ObjId {
    pub fn is_root(&self) -> bool {
        matches!(self, ObjId::Root)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjId::Root => f.write_str("_root"),
            ObjId::Op(id) => id.fmt(f),
        }
    }
}

pub(crate) fn encode_hex(data: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

pub(crate) fn decode_hex(s: &str) -> Result<Vec<u8>, IdError> {
    if s.len() % 2 != 0 {
        return Err(IdError::InvalidHex);
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let hi = (pair[0] as char).to_digit(16).ok_or(IdError::InvalidHex)? as u8;
        let lo = (pair[1] as char).to_digit(16).ok_or(IdError::InvalidHex)? as u8;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_id_orders_counter_then_actor() {
        let a = OpId::new(1, 2);
        let b = OpId::new(2, 1);
        let c = OpId::new(2, 2);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(OpId::new(3, 3), OpId::new(3, 3));
    }

    #[test]
    fn root_sorts_before_any_op_object() {
        assert!(ObjId::Root < ObjId::Op(OpId::new(0, 0)));
        assert!(ObjId::Op(OpId::new(1, 1)) < ObjId::Op(OpId::new(1, 2)));
    }

    #[test]
    fn actor_ids_order_lexicographically() {
        let mut ids = vec![
            ActorId::new(vec![0x02]),
            ActorId::new(vec![0x01, 0xff]),
            ActorId::new(vec![0x01]),
        ];
        ids.sort();
        assert_eq!(ids[0].as_bytes(), &[0x01]);
        assert_eq!(ids[1].as_bytes(), &[0x01, 0xff]);
        assert_eq!(ids[2].as_bytes(), &[0x02]);
    }

    #[test]
    fn change_hash_hex_roundtrip() {
        let h = ChangeHash([0xab; 32]);
        let parsed = ChangeHash::from_hex(&h.to_string()).expect("hex should parse");
        assert_eq!(parsed, h);
        assert!(matches!(
            ChangeHash::from_hex("abcd"),
            Err(IdError::InvalidChangeHashLength(2))
        ));
        assert!(matches!(ChangeHash::from_hex("zz"), Err(IdError::InvalidHex)));
    }
}
