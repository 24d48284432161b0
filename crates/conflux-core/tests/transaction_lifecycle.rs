use conflux_core::document::{DocError, Document};
use conflux_core::ids::{ObjId, OpId};
use conflux_core::transaction::CommitOptions;
use conflux_core::value::{ObjType, ScalarValue};

#[test]
fn commit_assigns_contiguous_op_ids_and_deps() {
    let mut doc = Document::new();
    let mut tx = doc.begin().expect("begin");
    tx.put(ObjId::Root, "a", ScalarValue::Int(1));
    tx.put(ObjId::Root, "b", ScalarValue::Int(2));
    let c1 = tx.commit().expect("commit").expect("change");

    assert_eq!(c1.actor, 1);
    assert_eq!(c1.seq, 1);
    assert_eq!(c1.start_op, 1);
    assert_eq!(c1.max_op, 2);
    assert!(c1.deps.is_empty());
    assert_eq!(c1.ops[0].id(), OpId::new(1, 1));
    assert_eq!(c1.ops[1].id(), OpId::new(2, 1));

    // The second change depends on the first and continues the op counter.
    let mut tx = doc.begin().expect("begin second");
    tx.put(ObjId::Root, "c", ScalarValue::Int(3));
    let c2 = tx.commit().expect("commit").expect("change");
    assert_eq!(c2.seq, 2);
    assert_eq!(c2.start_op, 3);
    assert_eq!(c2.deps, vec![c1.hash]);

    assert_eq!(doc.heads(), vec![c2.hash]);
    assert_eq!(doc.last_change().expect("last").hash, c2.hash);
}

#[test]
fn splice_text_consumes_multiple_op_counters() {
    let mut doc = Document::new();
    let mut tx = doc.begin().expect("begin");
    let text = tx.put_object(ObjId::Root, "text", ObjType::Text);
    tx.splice_text(text, 0, 0, "hi");
    let c = tx.commit().expect("commit").expect("change");

    // put_object consumes op 1, the splice consumes ops 2 and 3.
    assert_eq!(c.max_op, 3);
    assert_eq!(doc.text(text, None), "hi");

    let mut tx = doc.begin().expect("begin");
    tx.splice_text(text, 2, 0, "!!");
    let c = tx.commit().expect("commit").expect("change");
    assert_eq!(c.start_op, 4);
    assert_eq!(c.max_op, 5);
    assert_eq!(doc.text(text, None), "hi!!");
}

#[test]
fn empty_commit_produces_no_change() {
    let mut doc = Document::new();
    let tx = doc.begin().expect("begin");
    assert!(tx.commit().expect("commit").is_none());
    assert!(doc.heads().is_empty());
    assert!(matches!(
        doc.last_change(),
        Err(DocError::NoLastCommittedChange)
    ));

    // A splice that deletes nothing and inserts nothing stages nothing.
    let mut tx = doc.begin().expect("begin");
    let text = tx.put_object(ObjId::Root, "t", ObjType::Text);
    tx.commit().expect("commit").expect("creation change");
    let mut tx = doc.begin().expect("begin");
    tx.splice_text(text, 0, 0, "");
    assert!(tx.commit().expect("commit").is_none());
}

#[test]
fn rollback_discards_staged_mutations() {
    let mut doc = Document::new();
    let mut tx = doc.begin().expect("begin");
    tx.put(ObjId::Root, "k", ScalarValue::Str("staged".into()));
    tx.rollback();

    assert!(doc.get_map(ObjId::Root, "k", None).is_none());
    assert!(doc.heads().is_empty());

    // Dropping an uncommitted transaction behaves like rollback.
    {
        let mut tx = doc.begin().expect("begin");
        tx.put(ObjId::Root, "k", ScalarValue::Str("dropped".into()));
    }
    assert!(doc.get_map(ObjId::Root, "k", None).is_none());
    doc.begin().expect("document reusable after drop");
}

#[test]
fn commit_options_feed_the_hash() {
    let mut doc1 = Document::new();
    let mut tx = doc1.begin().expect("begin");
    tx.put(ObjId::Root, "k", ScalarValue::Int(1));
    let plain = tx.commit().expect("commit").expect("change");

    let mut doc2 = Document::new();
    let mut tx = doc2.begin().expect("begin");
    tx.put(ObjId::Root, "k", ScalarValue::Int(1));
    let with_meta = tx
        .commit_with(CommitOptions {
            message: Some("initial".into()),
            time: Some(1_700_000_000),
        })
        .expect("commit")
        .expect("change");

    assert_ne!(plain.hash, with_meta.hash);
    assert_eq!(with_meta.message.as_deref(), Some("initial"));
    assert_eq!(with_meta.time, Some(1_700_000_000));
}

#[test]
fn mark_protocol_enforced_at_commit() {
    let mut doc = Document::new();
    let mut tx = doc.begin().expect("begin");
    let text = tx.put_object(ObjId::Root, "text", ObjType::Text);
    tx.splice_text(text, 0, 0, "hello");
    tx.commit().expect("commit").expect("seed");

    // Unclosed mark fails the commit.
    let mut tx = doc.begin().expect("begin");
    tx.mark_begin(text, 0, "bold", ScalarValue::Boolean(true));
    assert!(matches!(tx.commit(), Err(DocError::MarkNotClosed)));

    // Closing an unopened mark fails immediately.
    let mut tx = doc.begin().expect("begin");
    assert!(matches!(
        tx.mark_end(text, 2, "bold"),
        Err(DocError::MarkNotOpen)
    ));
    tx.rollback();

    // End before start is an invalid range.
    let mut tx = doc.begin().expect("begin");
    tx.mark_begin(text, 3, "bold", ScalarValue::Boolean(true));
    assert!(matches!(
        tx.mark_end(text, 1, "bold"),
        Err(DocError::InvalidMarkRange)
    ));
    tx.rollback();

    // The happy path records the mark over the open range.
    let mut tx = doc.begin().expect("begin");
    tx.mark_begin(text, 1, "bold", ScalarValue::Boolean(true));
    tx.mark_end(text, 4, "bold").expect("close mark");
    tx.commit().expect("commit").expect("mark change");
    let marks = doc.marks(text, None);
    assert_eq!(marks.len(), 1);
    assert_eq!((marks[0].start, marks[0].end), (1, 4));
    assert_eq!(marks[0].name, "bold");
}

#[test]
fn set_actor_rejects_zero() {
    let mut doc = Document::new();
    assert!(matches!(
        doc.set_actor(0),
        Err(DocError::InvalidCurrentActor)
    ));
    doc.set_actor(7).expect("valid actor");
    assert_eq!(doc.actor(), 7);
}

#[test]
fn nested_objects_materialize() {
    let mut doc = Document::new();
    let mut tx = doc.begin().expect("begin");
    let inner = tx.put_object(ObjId::Root, "inner", ObjType::Map);
    tx.put(inner, "x", ScalarValue::Str("y".into()));
    let list = tx.put_object(inner, "list", ObjType::List);
    tx.insert(list, 0, ScalarValue::Int(10));
    tx.insert(list, 1, ScalarValue::Int(20));
    tx.commit().expect("commit").expect("change");

    let v = doc.get_map(inner, "x", None).expect("nested value");
    assert_eq!(v.as_str(), Some("y"));
    let items = doc.list_range(list, 0, None, None);
    assert_eq!(items.len(), 2);
    assert_eq!(
        doc.get_map(ObjId::Root, "inner", None)
            .expect("object value")
            .as_object()
            .map(|(id, _)| id),
        Some(inner)
    );

    // Head-pinned read variants agree with the live reads.
    let heads = doc.heads();
    assert_eq!(
        doc.list_range_at(list, 0, None, &heads).expect("list at heads"),
        items
    );
    assert_eq!(
        doc.values_map_at(inner, &heads).expect("values at heads").len(),
        2
    );
    assert_eq!(
        doc.get_all_map_at(inner, "x", &heads).expect("all at heads").len(),
        1
    );
    doc.validate().expect("graph validates");
}
