//! The chunked binary container.
//!
//! A chunk is a 4-byte magic (`AMG6`), a 12-byte header, and the payload.
//! Header layout: version (u8, =1), type (u8), flags (u8, bit0 = deflate),
//! reserved (u8, =0), payload length (u32 BE), checksum (u32 BE). The
//! checksum is CRC32/IEEE over the *uncompressed* payload. Multiple chunks
//! may be concatenated back to back.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"AMG6";
pub const VERSION_1: u8 = 1;

const HEADER_LEN: usize = 12;
const FLAG_DEFLATE: u8 = 1 << 0;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("bad magic")]
    BadMagic,
    #[error("short header")]
    ShortHeader,
    #[error("short payload")]
    ShortPayload,
    #[error("bad checksum")]
    BadChecksum,
    #[error("unknown chunk type: {0}")]
    UnknownChunk(u8),
    #[error("inflate payload")]
    Inflate,
    #[error("deflate payload")]
    Deflate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    Document = 1,
    Change = 2,
    CompressedChange = 3,
    Bundle = 4,
}

impl ChunkType {
    fn from_u8(v: u8) -> Result<Self, ChunkError> {
        match v {
            1 => Ok(ChunkType::Document),
            2 => Ok(ChunkType::Change),
            3 => Ok(ChunkType::CompressedChange),
            4 => Ok(ChunkType::Bundle),
            other => Err(ChunkError::UnknownChunk(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub ty: ChunkType,
    pub flags: u8,
    pub reserved: u8,
    pub payload_len: u32,
    pub checksum: u32,
}

impl Header {
    pub fn is_deflated(&self) -> bool {
        self.flags & FLAG_DEFLATE != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedChunk {
    pub header: Header,
    /// Payload after inflation; the checksum has already been verified.
    pub payload: Vec<u8>,
}

pub fn encode_chunk(ty: ChunkType, payload: &[u8], deflate: bool) -> Result<Vec<u8>, ChunkError> {
    let mut flags = 0u8;
    let body;
    if deflate {
        body = deflate_bytes(payload)?;
        flags |= FLAG_DEFLATE;
    } else {
        body = payload.to_vec();
    }
    let checksum = crc32fast::hash(payload);

    let mut out = Vec::with_capacity(MAGIC.len() + HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC);
    out.push(VERSION_1);
    out.push(ty as u8);
    out.push(flags);
    out.push(0);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&checksum.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn parse_chunks(data: &[u8]) -> Result<Vec<DecodedChunk>, ChunkError> {
    let mut chunks = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        if data.len() - offset < MAGIC.len() + HEADER_LEN {
            return Err(ChunkError::ShortHeader);
        }
        if data[offset..offset + MAGIC.len()] != MAGIC {
            return Err(ChunkError::BadMagic);
        }
        offset += MAGIC.len();
        let hdr = &data[offset..offset + HEADER_LEN];
        offset += HEADER_LEN;
        let header = Header {
            version: hdr[0],
            ty: ChunkType::from_u8(hdr[1])?,
            flags: hdr[2],
            reserved: hdr[3],
            payload_len: u32::from_be_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]),
            checksum: u32::from_be_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]),
        };
        let len = header.payload_len as usize;
        if data.len() - offset < len {
            return Err(ChunkError::ShortPayload);
        }
        let raw = &data[offset..offset + len];
        offset += len;
        let payload = if header.is_deflated() {
            inflate_bytes(raw)?
        } else {
            raw.to_vec()
        };
        if crc32fast::hash(&payload) != header.checksum {
            return Err(ChunkError::BadChecksum);
        }
        chunks.push(DecodedChunk { header, payload });
    }
    Ok(chunks)
}

pub(crate) fn deflate_bytes(input: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::fast());
    enc.write_all(input).map_err(|_| ChunkError::Deflate)?;
    enc.finish().map_err(|_| ChunkError::Deflate)
}

pub(crate) fn inflate_bytes(input: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let mut out = Vec::with_capacity((input.len() * 3).max(1024));
    DeflateDecoder::new(input)
        .read_to_end(&mut out)
        .map_err(|_| ChunkError::Inflate)?;
    Ok(out)
}
