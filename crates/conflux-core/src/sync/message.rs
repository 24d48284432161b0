//! The sync message wire format.
//!
//! One leading type byte (0x42 for the V1 change-list message, 0x43 for the
//! V2 full-document message) followed by a JSON DTO with a fixed field
//! order: hex heads, have entries (last-sync hashes plus 16 bloom words as
//! 16-digit hex), hex needs, capability codes, and optional base64 change /
//! document payloads. Encoding the same message twice yields identical
//! bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ChangeHash, IdError};

use super::bloom::{BloomFilter, BLOOM_WORDS};
use super::state::{Capability, Have};

pub const MESSAGE_TYPE_V1: u8 = 0x42;
pub const MESSAGE_TYPE_V2: u8 = 0x43;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync message decode")]
    MessageDecode,
    #[error("sync state decode")]
    StateDecode,
    #[error("sync message encode: {0}")]
    Encode(serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: MessageVersion,
    pub heads: Vec<ChangeHash>,
    pub have: Vec<Have>,
    pub need: Vec<ChangeHash>,
    pub capabilities: Vec<Capability>,
    pub change_payload: Option<Vec<u8>>,
    pub document_payload: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct MessageDto {
    heads: Vec<String>,
    have: Vec<HaveDto>,
    need: Vec<String>,
    caps: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    changes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    document: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct HaveDto {
    last_sync: Vec<String>,
    bloom: [String; BLOOM_WORDS],
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        let dto = MessageDto {
            heads: hashes_to_hex(&self.heads),
            have: self
                .have
                .iter()
                .map(|h| HaveDto {
                    last_sync: hashes_to_hex(&h.last_sync),
                    bloom: h.bloom.words.map(|w| format!("{w:016x}")),
                })
                .collect(),
            need: hashes_to_hex(&self.need),
            caps: self.capabilities.iter().map(|&c| c as u8).collect(),
            changes: self.change_payload.as_deref().map(|b| BASE64.encode(b)),
            document: self.document_payload.as_deref().map(|b| BASE64.encode(b)),
        };
        let payload = serde_json::to_vec(&dto).map_err(SyncError::Encode)?;
        let ty = match self.version {
            MessageVersion::V1 => MESSAGE_TYPE_V1,
            MessageVersion::V2 => MESSAGE_TYPE_V2,
        };
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(ty);
        out.extend(payload);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Message, SyncError> {
        let (&ty, body) = data.split_first().ok_or(SyncError::MessageDecode)?;
        let version = match ty {
            MESSAGE_TYPE_V1 => MessageVersion::V1,
            MESSAGE_TYPE_V2 => MessageVersion::V2,
            _ => return Err(SyncError::MessageDecode),
        };
        let dto: MessageDto =
            serde_json::from_slice(body).map_err(|_| SyncError::MessageDecode)?;

        let mut have = Vec::with_capacity(dto.have.len());
        for hv in &dto.have {
            let mut bloom = BloomFilter::new();
            for (i, word) in hv.bloom.iter().enumerate() {
                bloom.words[i] =
                    u64::from_str_radix(word, 16).map_err(|_| SyncError::MessageDecode)?;
            }
            have.push(Have {
                last_sync: hex_to_hashes(&hv.last_sync)?,
                bloom,
            });
        }

        Ok(Message {
            version,
            heads: hex_to_hashes(&dto.heads)?,
            have,
            need: hex_to_hashes(&dto.need)?,
            capabilities: dto
                .caps
                .iter()
                .filter_map(|&c| Capability::from_u8(c))
                .collect(),
            change_payload: decode_payload(dto.changes.as_deref())?,
            document_payload: decode_payload(dto.document.as_deref())?,
        })
    }
}

fn decode_payload(field: Option<&str>) -> Result<Option<Vec<u8>>, SyncError> {
    match field {
        Some(b64) => Ok(Some(
            BASE64.decode(b64).map_err(|_| SyncError::MessageDecode)?,
        )),
        None => Ok(None),
    }
}

fn hashes_to_hex(hashes: &[ChangeHash]) -> Vec<String> {
    hashes.iter().map(ChangeHash::to_string).collect()
}

fn hex_to_hashes(strs: &[String]) -> Result<Vec<ChangeHash>, SyncError> {
    strs.iter()
        .map(|s| ChangeHash::from_hex(s))
        .collect::<Result<Vec<_>, IdError>>()
        .map_err(|_| SyncError::MessageDecode)
}
