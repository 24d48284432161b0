//! The legacy binary container, recognized for interop and preserved
//! bit-exact by callers.
//!
//! Layout per chunk: 4-byte magic `85 6f 4a 83`, 4 checksum bytes, a type
//! byte, a ULEB128 payload length, then the payload. The checksum is the
//! first 4 bytes of SHA-256 over `type || ULEB128(len) || payload`; the
//! compressed variant is checksummed against the *inflated* bytes with the
//! plain-change type byte.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::chunk::inflate_bytes;
use crate::columns::{read_uleb, write_uleb};

pub const LEGACY_MAGIC: [u8; 4] = [0x85, 0x6f, 0x4a, 0x83];

#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("legacy bad magic")]
    BadMagic,
    #[error("legacy short input")]
    Short,
    #[error("legacy checksum mismatch")]
    Checksum,
    #[error("legacy unknown chunk type: {0}")]
    UnknownChunk(u8),
    #[error("legacy bad length encoding")]
    Uleb,
    #[error("legacy inflate payload")]
    Inflate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LegacyChunkType {
    Document = 0,
    Change = 1,
    Compressed = 2,
    Bundle = 3,
}

impl LegacyChunkType {
    fn from_u8(v: u8) -> Result<Self, LegacyError> {
        match v {
            0 => Ok(LegacyChunkType::Document),
            1 => Ok(LegacyChunkType::Change),
            2 => Ok(LegacyChunkType::Compressed),
            3 => Ok(LegacyChunkType::Bundle),
            other => Err(LegacyError::UnknownChunk(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyChunk {
    pub ty: LegacyChunkType,
    pub checksum: [u8; 4],
    /// Raw payload as stored; compressed chunks stay compressed.
    pub payload: Vec<u8>,
}

/// Returns `true` when the input starts with the legacy magic bytes.
pub fn is_legacy(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == LEGACY_MAGIC
}

pub fn parse_legacy_chunks(data: &[u8]) -> Result<Vec<LegacyChunk>, LegacyError> {
    let mut offset = 0usize;
    let mut out = Vec::new();
    while offset < data.len() {
        if data.len() - offset < 9 {
            return Err(LegacyError::Short);
        }
        if data[offset..offset + 4] != LEGACY_MAGIC {
            return Err(LegacyError::BadMagic);
        }
        offset += 4;
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&data[offset..offset + 4]);
        offset += 4;
        let ty = LegacyChunkType::from_u8(data[offset])?;
        offset += 1;
        let (len, n) = read_uleb(&data[offset..]).ok_or(LegacyError::Uleb)?;
        offset += n;
        let len = len as usize;
        if data.len() - offset < len {
            return Err(LegacyError::Short);
        }
        let payload = data[offset..offset + len].to_vec();
        offset += len;

        if ty == LegacyChunkType::Compressed {
            let inflated = inflate_bytes(&payload).map_err(|_| LegacyError::Inflate)?;
            if !checksum_matches(checksum, LegacyChunkType::Change, &inflated) {
                return Err(LegacyError::Checksum);
            }
        } else if !checksum_matches(checksum, ty, &payload) {
            return Err(LegacyError::Checksum);
        }

        out.push(LegacyChunk { ty, checksum, payload });
    }
    Ok(out)
}

fn checksum_matches(checksum: [u8; 4], ty: LegacyChunkType, payload: &[u8]) -> bool {
    let mut h = Sha256::new();
    h.update([ty as u8]);
    let mut len_enc = Vec::new();
    write_uleb(&mut len_enc, payload.len() as u64);
    h.update(&len_enc);
    h.update(payload);
    let sum = h.finalize();
    checksum == sum[..4]
}
