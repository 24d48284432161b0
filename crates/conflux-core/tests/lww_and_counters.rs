use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use conflux_core::change::Change;
use conflux_core::document::Document;
use conflux_core::ids::ObjId;
use conflux_core::opset::OpSetError;
use conflux_core::value::ScalarValue;

fn commit_put(doc: &mut Document, key: &str, value: ScalarValue) -> Change {
    let mut tx = doc.begin().expect("begin");
    tx.put(ObjId::Root, key, value);
    tx.commit().expect("commit").expect("change")
}

#[test]
fn concurrent_puts_resolve_by_actor_tie_break() {
    // Actor 1 and actor 2 concurrently put root.k with the same counter; the
    // higher actor index must win on both replicas.
    let mut doc1 = Document::new();
    commit_put(&mut doc1, "k", ScalarValue::Str("A".into()));

    let mut doc2 = Document::new();
    doc2.set_actor(2).expect("actor");
    commit_put(&mut doc2, "k", ScalarValue::Str("B".into()));

    doc1.merge(&doc2).expect("merge into doc1");
    doc2.merge(&doc1).expect("merge into doc2");

    for doc in [&doc1, &doc2] {
        let winner = doc.get_map(ObjId::Root, "k", None).expect("winner");
        assert_eq!(winner.as_str(), Some("B"));

        let all = doc.get_all_map(ObjId::Root, "k", None);
        let mut values: Vec<&str> = all.iter().filter_map(|v| v.as_str()).collect();
        values.sort_unstable();
        assert_eq!(values, vec!["A", "B"]);
    }
    assert_eq!(doc1.heads(), doc2.heads());
}

#[test]
fn later_counter_beats_actor_index() {
    let mut doc1 = Document::new();
    commit_put(&mut doc1, "k", ScalarValue::Str("old".into()));

    // Actor 2 sees actor 1's change first, so its op counter is higher.
    let mut doc2 = Document::new();
    doc2.set_actor(2).expect("actor");
    doc2.merge(&doc1).expect("sync up");
    commit_put(&mut doc2, "k", ScalarValue::Str("new".into()));

    doc1.merge(&doc2).expect("merge back");
    let winner = doc1.get_map(ObjId::Root, "k", None).expect("winner");
    assert_eq!(winner.as_str(), Some("new"));
    assert_eq!(doc1.get_all_map(ObjId::Root, "k", None).len(), 1);
}

#[test]
fn historical_read_at_old_heads() {
    let mut doc = Document::new();
    let c1 = commit_put(&mut doc, "k", ScalarValue::Str("one".into()));
    commit_put(&mut doc, "k", ScalarValue::Str("two".into()));

    let old = doc
        .get_map_at(ObjId::Root, "k", &[c1.hash])
        .expect("historical read")
        .expect("value at old heads");
    assert_eq!(old.as_str(), Some("one"));

    let now = doc.get_map(ObjId::Root, "k", None).expect("current value");
    assert_eq!(now.as_str(), Some("two"));

    // Reading at empty heads sees the empty document.
    assert!(doc
        .get_map_at(ObjId::Root, "k", &[])
        .expect("read at nothing")
        .is_none());
}

#[test]
fn counter_increments_sum_regardless_of_order() {
    let mut source = Document::new();
    commit_put(&mut source, "n", ScalarValue::Counter(0));
    let increments = [5i64, -2, 10, 1, -7, 3];
    for by in increments {
        let mut tx = source.begin().expect("begin");
        tx.increment(ObjId::Root, "n", by);
        tx.commit().expect("commit").expect("change");
    }
    let expected: i64 = increments.iter().sum();

    let check = |doc: &Document| {
        let v = doc.get_map(ObjId::Root, "n", None).expect("counter");
        assert_eq!(
            v.as_scalar().and_then(ScalarValue::as_counter),
            Some(expected)
        );
    };
    check(&source);

    let changes = source.all_changes();
    let mut rng = StdRng::seed_from_u64(13);
    for _ in 0..5 {
        let mut shuffled = changes.clone();
        shuffled.shuffle(&mut rng);
        let mut target = Document::new();
        target.apply_changes(shuffled).expect("apply");
        check(&target);
    }
}

#[test]
fn increment_of_missing_or_non_counter_fails() {
    let mut doc = Document::new();
    let mut tx = doc.begin().expect("begin");
    tx.increment(ObjId::Root, "absent", 1);
    assert!(tx.commit().is_err());

    commit_put(&mut doc, "s", ScalarValue::Str("text".into()));
    let mut tx = doc.begin().expect("begin");
    tx.increment(ObjId::Root, "s", 1);
    assert!(tx.commit().is_err());
}

#[test]
fn deleted_key_disappears_from_iteration() {
    let mut doc = Document::new();
    commit_put(&mut doc, "keep", ScalarValue::Int(1));
    commit_put(&mut doc, "drop", ScalarValue::Int(2));

    let mut tx = doc.begin().expect("begin");
    tx.delete_map(ObjId::Root, "drop");
    tx.commit().expect("commit").expect("change");

    let keys = doc
        .keys_map_at(ObjId::Root, &doc.heads())
        .expect("keys at heads");
    assert_eq!(keys, vec!["keep"]);
    let items = doc.iter_map_at(ObjId::Root, &doc.heads()).expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].0, "keep");
}

#[test]
fn wrong_object_kind_surfaces_typed_errors() {
    let mut doc = Document::new();
    let mut tx = doc.begin().expect("begin");
    tx.insert(ObjId::Root, 0, ScalarValue::Int(1));
    let err = tx.commit().expect_err("list insert into a map");
    match err {
        conflux_core::document::DocError::OpSet(OpSetError::WrongObjectType(ty)) => {
            assert_eq!(ty, conflux_core::value::ObjType::Map);
        }
        other => panic!("unexpected error: {other}"),
    }
}
