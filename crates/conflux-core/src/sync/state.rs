//! Per-peer sync state and its opt-in persisted form.
//!
//! Only the shared-heads estimate is durable; everything else (their
//! advertised heads/needs/haves, in-flight gating, sent-hash tracking) is
//! ephemeral and rebuilt over the next exchange.

use std::collections::HashSet;

use conflux_storage::{read_uleb, write_uleb};

use crate::ids::ChangeHash;

use super::bloom::BloomFilter;
use super::message::SyncError;

const STATE_TYPE: u8 = 0x43;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Capability {
    MessageV1 = 0,
    MessageV2 = 1,
}

impl Capability {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Capability::MessageV1),
            1 => Some(Capability::MessageV2),
            _ => None,
        }
    }
}

/// One peer-supplied summary of what it already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Have {
    pub last_sync: Vec<ChangeHash>,
    pub bloom: BloomFilter,
}

#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub shared_heads: Vec<ChangeHash>,
    pub last_sent_heads: Vec<ChangeHash>,
    pub their_heads: Option<Vec<ChangeHash>>,
    pub their_need: Option<Vec<ChangeHash>>,
    pub their_have: Option<Vec<Have>>,
    pub sent_hashes: HashSet<ChangeHash>,
    pub in_flight: bool,
    pub have_responded: bool,
    pub their_capabilities: Option<Vec<Capability>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A whole-document send is right when the peer has nothing and can
    /// accept the V2 message.
    pub fn send_doc(&self) -> bool {
        match (&self.their_heads, &self.their_capabilities) {
            (Some(heads), Some(_)) => heads.is_empty() && self.supports_v2(),
            _ => false,
        }
    }

    pub fn supports_v2(&self) -> bool {
        self.their_capabilities
            .as_ref()
            .is_some_and(|caps| caps.contains(&Capability::MessageV2))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![STATE_TYPE];
        write_uleb(&mut out, self.shared_heads.len() as u64);
        for h in &self.shared_heads {
            out.extend_from_slice(h.as_bytes());
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, SyncError> {
        if data.first() != Some(&STATE_TYPE) {
            return Err(SyncError::StateDecode);
        }
        let mut offset = 1usize;
        let (count, n) = read_uleb(&data[offset..]).ok_or(SyncError::StateDecode)?;
        offset += n;
        let mut shared_heads = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if data.len() - offset < 32 {
                return Err(SyncError::StateDecode);
            }
            shared_heads.push(
                ChangeHash::from_bytes(&data[offset..offset + 32])
                    .map_err(|_| SyncError::StateDecode)?,
            );
            offset += 32;
        }
        if offset != data.len() {
            return Err(SyncError::StateDecode);
        }
        let mut state = SyncState::new();
        state.shared_heads = shared_heads;
        // A restored peer re-advertises from scratch.
        state.their_have = Some(Vec::new());
        Ok(state)
    }
}
