//! The change graph: an append-only DAG of change metadata keyed by hash.
//!
//! The graph answers the questions the rest of the engine asks constantly:
//! what are the heads, what is reachable from a set of heads, what clock does
//! a set of heads induce, and which hash holds (actor, seq). Nodes precompute
//! their parent indices so closure walks never touch the hash map.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::clock::Clock;
use crate::ids::ChangeHash;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("change already exists")]
    ChangeExists,
    #[error("unknown dependency: {0}")]
    UnknownDependency(ChangeHash),
    #[error("invalid actor sequence: actor={actor} got={got} want={want}")]
    InvalidActorSeq { actor: u32, got: u64, want: u64 },
    #[error("unknown head: {0}")]
    UnknownHead(ChangeHash),
    #[error("change graph validation mismatch: {0}")]
    ValidationMismatch(&'static str),
}

/// The metadata the graph retains per change.
#[derive(Debug, Clone)]
pub struct ChangeMeta {
    pub hash: ChangeHash,
    pub deps: Vec<ChangeHash>,
    pub actor: u32,
    pub seq: u64,
    pub max_op: u64,
}

#[derive(Debug, Clone)]
struct Node {
    hash: ChangeHash,
    dep_idx: Vec<usize>,
    dep_hash: Vec<ChangeHash>,
    actor: u32,
    seq: u64,
    max_op: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeGraph {
    nodes: Vec<Node>,
    by_hash: HashMap<ChangeHash, usize>,
    head_set: HashSet<ChangeHash>,
    by_actor: HashMap<u32, Vec<usize>>,
    max_op: u64,
}

impl ChangeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn max_op(&self) -> u64 {
        self.max_op
    }

    pub fn max_op_for_actor(&self, actor: u32) -> u64 {
        match self.by_actor.get(&actor).and_then(|idxs| idxs.last()) {
            Some(&idx) => self.nodes[idx].max_op,
            None => 0,
        }
    }

    /// The number of changes the actor has contributed, which is also its
    /// latest seq.
    pub fn seq_for_actor(&self, actor: u32) -> u64 {
        self.by_actor.get(&actor).map_or(0, |idxs| idxs.len() as u64)
    }

    pub fn hash_for_actor_seq(&self, actor: u32, seq: u64) -> Option<ChangeHash> {
        if seq == 0 {
            return None;
        }
        let idxs = self.by_actor.get(&actor)?;
        let idx = *idxs.get(seq as usize - 1)?;
        Some(self.nodes[idx].hash)
    }

    /// Actor indices present in the graph, ascending.
    pub fn actor_ids(&self) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .by_actor
            .iter()
            .filter(|(_, idxs)| !idxs.is_empty())
            .map(|(&a, _)| a)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn has_change(&self, hash: ChangeHash) -> bool {
        self.by_hash.contains_key(&hash)
    }

    pub fn hash_to_index(&self, hash: ChangeHash) -> Option<usize> {
        self.by_hash.get(&hash).copied()
    }

    pub fn index_to_hash(&self, index: usize) -> Option<ChangeHash> {
        self.nodes.get(index).map(|n| n.hash)
    }

    /// Heads in ascending hash order.
    pub fn heads(&self) -> Vec<ChangeHash> {
        let mut heads: Vec<ChangeHash> = self.head_set.iter().copied().collect();
        heads.sort_unstable();
        heads
    }

    pub fn deps_for_hash(&self, hash: ChangeHash) -> Option<Vec<ChangeHash>> {
        let idx = self.by_hash.get(&hash)?;
        Some(self.nodes[*idx].dep_hash.clone())
    }

    pub fn add_change(&mut self, meta: ChangeMeta) -> Result<(), GraphError> {
        if self.by_hash.contains_key(&meta.hash) {
            return Err(GraphError::ChangeExists);
        }
        let want = self.seq_for_actor(meta.actor) + 1;
        if meta.seq != want {
            return Err(GraphError::InvalidActorSeq {
                actor: meta.actor,
                got: meta.seq,
                want,
            });
        }

        let mut dep_hash = meta.deps;
        dep_hash.sort_unstable();
        let mut dep_idx = Vec::with_capacity(dep_hash.len());
        for dep in &dep_hash {
            match self.by_hash.get(dep) {
                Some(&idx) => dep_idx.push(idx),
                None => return Err(GraphError::UnknownDependency(*dep)),
            }
        }

        let index = self.nodes.len();
        self.nodes.push(Node {
            hash: meta.hash,
            dep_idx,
            dep_hash: dep_hash.clone(),
            actor: meta.actor,
            seq: meta.seq,
            max_op: meta.max_op,
        });
        self.by_hash.insert(meta.hash, index);
        self.by_actor.entry(meta.actor).or_default().push(index);
        if meta.max_op > self.max_op {
            self.max_op = meta.max_op;
        }

        self.head_set.insert(meta.hash);
        for dep in &dep_hash {
            self.head_set.remove(dep);
        }
        Ok(())
    }

    /// The transitive closure reachable from `heads` (empty means the whole
    /// graph), dependencies before dependents, deterministic for equal input.
    pub fn hashes_from_heads(&self, heads: &[ChangeHash]) -> Result<Vec<ChangeHash>, GraphError> {
        if heads.is_empty() {
            return Ok(self.nodes.iter().map(|n| n.hash).collect());
        }

        let mut ordered = heads.to_vec();
        ordered.sort_unstable();
        for h in &ordered {
            if !self.has_change(*h) {
                return Err(GraphError::UnknownHead(*h));
            }
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut out = Vec::with_capacity(self.nodes.len());
        for h in &ordered {
            self.dfs_post_order(self.by_hash[h], &mut visited, &mut out);
        }
        Ok(out)
    }

    fn dfs_post_order(&self, idx: usize, visited: &mut [bool], out: &mut Vec<ChangeHash>) {
        if visited[idx] {
            return;
        }
        visited[idx] = true;
        for &dep in &self.nodes[idx].dep_idx {
            self.dfs_post_order(dep, visited, out);
        }
        out.push(self.nodes[idx].hash);
    }

    pub fn clock_for_heads(&self, heads: &[ChangeHash]) -> Result<Clock, GraphError> {
        let hashes = self.hashes_from_heads(heads)?;
        let mut clock = Clock::new();
        for h in hashes {
            let n = &self.nodes[self.by_hash[&h]];
            clock.observe(n.actor, n.max_op);
        }
        Ok(clock)
    }

    /// Cross-checks every derived structure against the node list.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.len() != self.by_hash.len() {
            return Err(GraphError::ValidationMismatch("node/hash count mismatch"));
        }

        let mut computed_heads: HashSet<ChangeHash> =
            self.nodes.iter().map(|n| n.hash).collect();
        let mut local_max = 0u64;
        for (idx, n) in self.nodes.iter().enumerate() {
            local_max = local_max.max(n.max_op);
            if self.by_hash.get(&n.hash) != Some(&idx) {
                return Err(GraphError::ValidationMismatch("hash index mismatch"));
            }
            if n.dep_idx.len() != n.dep_hash.len() {
                return Err(GraphError::ValidationMismatch(
                    "dep index/hash length mismatch",
                ));
            }
            for (i, &dep_idx) in n.dep_idx.iter().enumerate() {
                let Some(dep) = self.nodes.get(dep_idx) else {
                    return Err(GraphError::ValidationMismatch("invalid node index"));
                };
                if dep.hash != n.dep_hash[i] {
                    return Err(GraphError::ValidationMismatch("dependency hash mismatch"));
                }
                computed_heads.remove(&n.dep_hash[i]);
            }
        }

        if local_max != self.max_op {
            return Err(GraphError::ValidationMismatch("max op mismatch"));
        }
        if computed_heads != self.head_set {
            return Err(GraphError::ValidationMismatch("head set mismatch"));
        }

        for (&actor, idxs) in &self.by_actor {
            for (i, &idx) in idxs.iter().enumerate() {
                let n = &self.nodes[idx];
                if n.actor != actor {
                    return Err(GraphError::ValidationMismatch("actor mismatch"));
                }
                if n.seq != i as u64 + 1 {
                    return Err(GraphError::ValidationMismatch("actor seq mismatch"));
                }
            }
        }
        Ok(())
    }
}
