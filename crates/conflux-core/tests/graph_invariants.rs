use conflux_core::graph::{ChangeGraph, ChangeMeta, GraphError};
use conflux_core::ids::ChangeHash;

fn hash(n: u8) -> ChangeHash {
    ChangeHash([n; 32])
}

fn meta(n: u8, deps: Vec<ChangeHash>, actor: u32, seq: u64, max_op: u64) -> ChangeMeta {
    ChangeMeta {
        hash: hash(n),
        deps,
        actor,
        seq,
        max_op,
    }
}

#[test]
fn add_change_tracks_heads_and_max_op() {
    let mut g = ChangeGraph::new();
    g.add_change(meta(1, vec![], 1, 1, 3)).expect("root change");
    assert_eq!(g.heads(), vec![hash(1)]);
    assert_eq!(g.max_op(), 3);

    g.add_change(meta(2, vec![hash(1)], 1, 2, 5)).expect("child change");
    assert_eq!(g.heads(), vec![hash(2)]);
    assert_eq!(g.max_op(), 5);

    // A concurrent branch creates a second head; heads come back sorted.
    g.add_change(meta(9, vec![hash(1)], 2, 1, 6)).expect("branch change");
    assert_eq!(g.heads(), vec![hash(2), hash(9)]);
    g.validate().expect("graph should validate");
}

#[test]
fn add_change_rejects_duplicates_gaps_and_unknown_deps() {
    let mut g = ChangeGraph::new();
    g.add_change(meta(1, vec![], 1, 1, 1)).expect("first");

    assert!(matches!(
        g.add_change(meta(1, vec![], 2, 1, 1)),
        Err(GraphError::ChangeExists)
    ));
    assert!(matches!(
        g.add_change(meta(2, vec![], 1, 3, 2)),
        Err(GraphError::InvalidActorSeq { actor: 1, got: 3, want: 2 })
    ));
    assert!(matches!(
        g.add_change(meta(3, vec![hash(77)], 1, 2, 2)),
        Err(GraphError::UnknownDependency(_))
    ));

    // Failed inserts must leave no trace.
    assert_eq!(g.len(), 1);
    g.validate().expect("graph should still validate");
}

#[test]
fn no_head_is_a_dependency_of_any_node() {
    let mut g = ChangeGraph::new();
    g.add_change(meta(1, vec![], 1, 1, 1)).expect("c1");
    g.add_change(meta(2, vec![hash(1)], 1, 2, 2)).expect("c2");
    g.add_change(meta(3, vec![hash(1)], 2, 1, 3)).expect("c3");
    g.add_change(meta(4, vec![hash(2), hash(3)], 1, 3, 4)).expect("merge");

    let heads = g.heads();
    assert_eq!(heads, vec![hash(4)]);
    for n in 1..=4u8 {
        let deps = g.deps_for_hash(hash(n)).expect("known hash");
        for d in deps {
            assert!(!heads.contains(&d), "head {d} listed as a dependency");
        }
    }
}

#[test]
fn closure_is_dependency_first_and_deterministic() {
    let mut g = ChangeGraph::new();
    g.add_change(meta(5, vec![], 1, 1, 1)).expect("c5");
    g.add_change(meta(3, vec![hash(5)], 1, 2, 2)).expect("c3");
    g.add_change(meta(8, vec![hash(5)], 2, 1, 3)).expect("c8");
    g.add_change(meta(2, vec![hash(3), hash(8)], 1, 3, 4)).expect("merge");

    let heads = g.heads();
    let a = g.hashes_from_heads(&heads).expect("closure a");
    let b = g.hashes_from_heads(&heads).expect("closure b");
    assert_eq!(a, b, "same heads must give identical closures");

    let position = |h: ChangeHash| a.iter().position(|&x| x == h).expect("in closure");
    for n in [3u8, 8, 2] {
        for d in g.deps_for_hash(hash(n)).expect("deps") {
            assert!(position(d) < position(hash(n)), "dep after dependent");
        }
    }

    // Empty heads mean the full graph.
    assert_eq!(g.hashes_from_heads(&[]).expect("full closure").len(), 4);
    assert!(matches!(
        g.hashes_from_heads(&[hash(99)]),
        Err(GraphError::UnknownHead(_))
    ));
}

#[test]
fn clock_for_heads_covers_the_closure_only() {
    let mut g = ChangeGraph::new();
    g.add_change(meta(1, vec![], 1, 1, 2)).expect("c1");
    g.add_change(meta(2, vec![hash(1)], 1, 2, 4)).expect("c2");
    g.add_change(meta(3, vec![hash(1)], 2, 1, 9)).expect("c3");

    let clock = g.clock_for_heads(&[hash(2)]).expect("clock");
    assert_eq!(clock.max_seq(1), 4);
    assert_eq!(clock.max_seq(2), 0);
    assert!(clock.covers(1, 4));
    assert!(!clock.covers(2, 1));

    let full = g.clock_for_heads(&g.heads()).expect("full clock");
    assert_eq!(full.max_seq(2), 9);
}

#[test]
fn per_actor_sequences_are_dense() {
    let mut g = ChangeGraph::new();
    g.add_change(meta(1, vec![], 7, 1, 1)).expect("a7s1");
    g.add_change(meta(2, vec![hash(1)], 7, 2, 2)).expect("a7s2");
    g.add_change(meta(3, vec![hash(2)], 7, 3, 3)).expect("a7s3");
    g.add_change(meta(4, vec![hash(1)], 9, 1, 4)).expect("a9s1");

    assert_eq!(g.seq_for_actor(7), 3);
    assert_eq!(g.seq_for_actor(9), 1);
    assert_eq!(g.seq_for_actor(42), 0);
    for seq in 1..=3 {
        assert_eq!(g.hash_for_actor_seq(7, seq), Some(hash(seq as u8)));
    }
    assert_eq!(g.hash_for_actor_seq(7, 0), None);
    assert_eq!(g.hash_for_actor_seq(7, 4), None);
    assert_eq!(g.actor_ids(), vec![7, 9]);
    assert_eq!(g.max_op_for_actor(7), 3);
    assert_eq!(g.max_op_for_actor(9), 4);
}

#[test]
fn hash_and_index_map_both_ways() {
    let mut g = ChangeGraph::new();
    g.add_change(meta(1, vec![], 1, 1, 1)).expect("c1");
    g.add_change(meta(2, vec![hash(1)], 1, 2, 2)).expect("c2");

    let idx = g.hash_to_index(hash(2)).expect("known hash");
    assert_eq!(g.index_to_hash(idx), Some(hash(2)));
    assert!(g.hash_to_index(hash(9)).is_none());
    assert!(g.index_to_hash(99).is_none());
    assert!(g.has_change(hash(1)));
    assert!(!g.is_empty());
    assert_eq!(g.len(), 2);
}
