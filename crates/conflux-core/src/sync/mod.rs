//! Two-peer reconciliation: each side repeatedly generates a message for the
//! other and absorbs what comes back until neither has anything to say.
//!
//! Outgoing messages advertise our heads, what we are missing, and a Bloom
//! summary of what we already hold; payload selection prefers a V2
//! full-document send when the peer is empty (or when most of our history
//! would have to travel anyway) and falls back to the V1 change list.

use tracing::debug;

use crate::change::Change;
use crate::document::{DocError, Document};
use crate::ids::ChangeHash;
use crate::storage::{self, LoadOptions, OnPartialLoad};

pub mod bloom;
pub mod message;
pub mod state;

pub use bloom::BloomFilter;
pub use message::{Message, MessageVersion, SyncError};
pub use state::{Capability, Have, SyncState};

impl Document {
    /// Produces the next message for the peer described by `state`, or
    /// `None` when there is nothing new to say.
    pub fn generate_sync_message(
        &mut self,
        state: &mut SyncState,
    ) -> Result<Option<Message>, DocError> {
        let our_heads = self.heads();
        let their_heads = state.their_heads.clone().unwrap_or_default();

        let our_need = self.missing_deps(&their_heads);
        let our_have = vec![self.make_have(&state.shared_heads)];

        let mut msg = Message {
            version: MessageVersion::V1,
            heads: our_heads.clone(),
            have: our_have,
            need: our_need,
            capabilities: vec![Capability::MessageV1, Capability::MessageV2],
            change_payload: None,
            document_payload: None,
        };

        let mut hashes_to_send: Vec<ChangeHash> = Vec::new();
        if state.send_doc() {
            hashes_to_send = self.graph.hashes_from_heads(&our_heads)?;
            msg.version = MessageVersion::V2;
            msg.document_payload = Some(self.save()?);
            debug!(changes = hashes_to_send.len(), "sync: sending full document");
        } else if let (Some(their_have), Some(their_need)) =
            (state.their_have.clone(), state.their_need.clone())
        {
            hashes_to_send = self.hashes_to_send(&their_have, &their_need);
            if !hashes_to_send.is_empty() {
                let all = self.graph.hashes_from_heads(&our_heads).unwrap_or_default();
                if !all.is_empty() && hashes_to_send.len() > all.len() / 3 && state.supports_v2() {
                    msg.version = MessageVersion::V2;
                    msg.document_payload = Some(self.save()?);
                    debug!(
                        changes = hashes_to_send.len(),
                        total = all.len(),
                        "sync: bulk send as full document"
                    );
                } else {
                    msg.change_payload = Some(self.serialize_changes_by_hashes(&hashes_to_send)?);
                }
            }
        } else {
            // Initial handshake: send everything to guarantee convergence.
            hashes_to_send = self.graph.hashes_from_heads(&our_heads)?;
            msg.change_payload = Some(self.serialize_changes_by_hashes(&hashes_to_send)?);
        }

        let heads_unchanged = state.last_sent_heads == our_heads;
        let heads_equal = state
            .their_heads
            .as_ref()
            .is_some_and(|their| *their == our_heads);
        let msg_empty = payload_len(&msg.change_payload) == 0 && payload_len(&msg.document_payload) == 0;
        if heads_unchanged && state.have_responded {
            if heads_equal && msg_empty {
                return Ok(None);
            }
            if state.in_flight {
                return Ok(None);
            }
        }

        state.have_responded = true;
        state.last_sent_heads = our_heads;
        state.sent_hashes.extend(hashes_to_send);
        state.in_flight = true;
        Ok(Some(msg))
    }

    /// Absorbs a peer message: updates the peer view, ingests any payload,
    /// and recomputes the shared-heads estimate.
    pub fn receive_sync_message(
        &mut self,
        state: &mut SyncState,
        msg: Message,
    ) -> Result<(), DocError> {
        state.in_flight = false;
        state.their_heads = Some(msg.heads.clone());
        state.their_need = Some(msg.need.clone());
        if !msg.have.is_empty() {
            state.their_have = Some(msg.have.clone());
        }
        if !msg.capabilities.is_empty() {
            state.their_capabilities = Some(msg.capabilities.clone());
        }

        if let Some(doc_bytes) = &msg.document_payload {
            if !doc_bytes.is_empty() {
                let loaded = Document::load_with(
                    doc_bytes,
                    LoadOptions {
                        on_partial_load: OnPartialLoad::Ignore,
                        ..Default::default()
                    },
                )?;
                if loaded.legacy_raw.is_some() && loaded.changes.is_empty() {
                    // Interop path: keep bytes we cannot materialize so a
                    // later save round-trips them unchanged.
                    debug!("sync: preserving opaque legacy document payload");
                    self.legacy_raw = loaded.legacy_raw;
                } else {
                    self.apply_changes(loaded.all_changes())?;
                }
            }
        }

        if let Some(change_bytes) = &msg.change_payload {
            if !change_bytes.is_empty() {
                let dtos = storage::from_json_bytes(change_bytes)
                    .map_err(|err| DocError::SyncDecodeChanges(err.to_string()))?;
                let changes = storage::decode_changes(dtos)
                    .map_err(|err| DocError::SyncDecodeChanges(err.to_string()))?;
                self.apply_changes(changes)?;
            }
        }

        let mut shared = intersect_hashes(&self.heads(), &msg.heads);
        shared.sort_unstable();
        state.shared_heads = shared;
        state.sent_hashes.clear();
        Ok(())
    }

    /// Dep hashes referenced by queued changes or the peer's heads that we
    /// hold neither applied nor queued, sorted.
    fn missing_deps(&self, their_heads: &[ChangeHash]) -> Vec<ChangeHash> {
        let in_queue: std::collections::HashSet<ChangeHash> =
            self.queue.iter().map(|c| c.hash).collect();
        let mut missing: Vec<ChangeHash> = Vec::new();
        for c in &self.queue {
            for dep in &c.deps {
                if !self.has_change(*dep) && !missing.contains(dep) {
                    missing.push(*dep);
                }
            }
        }
        for h in their_heads {
            if !self.has_change(*h) && !missing.contains(h) {
                missing.push(*h);
            }
        }
        missing.retain(|h| !in_queue.contains(h));
        missing.sort_unstable();
        missing
    }

    fn make_have(&self, last_sync: &[ChangeHash]) -> Have {
        let hashes = match self.graph.hashes_from_heads(last_sync) {
            Ok(hashes) if !last_sync.is_empty() => hashes,
            _ => self
                .graph
                .hashes_from_heads(&self.heads())
                .unwrap_or_default(),
        };
        Have {
            last_sync: last_sync.to_vec(),
            bloom: BloomFilter::from_hashes(&hashes),
        }
    }

    /// Our closure filtered down to what the peer needs or provably lacks.
    fn hashes_to_send(&self, have: &[Have], need: &[ChangeHash]) -> Vec<ChangeHash> {
        let Ok(all) = self.graph.hashes_from_heads(&self.heads()) else {
            return Vec::new();
        };
        let need: std::collections::HashSet<ChangeHash> = need.iter().copied().collect();
        let mut out: Vec<ChangeHash> = all
            .into_iter()
            .filter(|h| self.changes.contains_key(h))
            .filter(|h| need.contains(h) || !have.iter().any(|hv| hv.bloom.contains_hash(*h)))
            .collect();
        out.sort_unstable();
        out
    }

    fn serialize_changes_by_hashes(&self, hashes: &[ChangeHash]) -> Result<Vec<u8>, DocError> {
        let changes: Vec<Change> = hashes
            .iter()
            .filter_map(|h| self.changes.get(h).cloned())
            .collect();
        storage::to_json_bytes(&storage::encode_changes(&changes))
    }
}

fn payload_len(payload: &Option<Vec<u8>>) -> usize {
    payload.as_ref().map_or(0, Vec::len)
}

fn intersect_hashes(ours: &[ChangeHash], theirs: &[ChangeHash]) -> Vec<ChangeHash> {
    let set: std::collections::HashSet<ChangeHash> = ours.iter().copied().collect();
    theirs.iter().copied().filter(|h| set.contains(h)).collect()
}
