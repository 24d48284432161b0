use conflux_core::diff::Patch;
use conflux_core::document::Document;
use conflux_core::ids::ObjId;
use conflux_core::value::{ObjType, ScalarValue};

fn doc_with_text(initial: &str) -> (Document, ObjId) {
    let mut doc = Document::new();
    let mut tx = doc.begin().expect("begin");
    let text = tx.put_object(ObjId::Root, "text", ObjType::Text);
    tx.splice_text(text, 0, 0, initial);
    tx.commit().expect("commit").expect("change");
    (doc, text)
}

#[test]
fn splice_edits_and_diffs_as_one_patch() {
    let (mut doc, text) = doc_with_text("hello");
    assert_eq!(doc.text(text, None), "hello");
    let heads_before = doc.heads();

    let mut tx = doc.begin().expect("begin");
    tx.splice_text(text, 1, 2, "a");
    tx.commit().expect("commit").expect("change");
    assert_eq!(doc.text(text, None), "halo");

    let patches = doc.diff(&heads_before, &doc.heads());
    assert_eq!(patches.len(), 1);
    match &patches[0] {
        Patch::TextSplice { obj, before, after } => {
            assert_eq!(*obj, text);
            assert_eq!(before, "hello");
            assert_eq!(after, "halo");
        }
        other => panic!("expected text splice, got {other:?}"),
    }

    // Reading at the old heads still sees the old text.
    assert_eq!(doc.text_at(text, &heads_before).expect("old text"), "hello");
}

#[test]
fn splice_handles_multibyte_chars() {
    let (mut doc, text) = doc_with_text("héllo");
    let mut tx = doc.begin().expect("begin");
    // Delete the accented char (one unicode scalar, two bytes).
    tx.splice_text(text, 1, 1, "e");
    tx.commit().expect("commit").expect("change");
    assert_eq!(doc.text(text, None), "hello");

    let mut tx = doc.begin().expect("begin");
    tx.splice_text(text, 5, 0, " 𝄞");
    tx.commit().expect("commit").expect("change");
    assert_eq!(doc.text(text, None), "hello 𝄞");
}

#[test]
fn concurrent_splices_converge() {
    let (mut doc1, text) = doc_with_text("base");
    let mut doc2 = Document::new();
    doc2.set_actor(2).expect("actor");
    doc2.merge(&doc1).expect("seed");

    let mut tx = doc1.begin().expect("begin");
    tx.splice_text(text, 0, 0, ">");
    tx.commit().expect("commit").expect("change");

    let mut tx = doc2.begin().expect("begin");
    tx.splice_text(text, 4, 0, "<");
    tx.commit().expect("commit").expect("change");

    doc1.merge(&doc2).expect("merge 2 into 1");
    doc2.merge(&doc1).expect("merge 1 into 2");

    assert_eq!(doc1.text(text, None), doc2.text(text, None));
    assert_eq!(doc1.heads(), doc2.heads());
}

#[test]
fn marks_survive_merge_and_sort_deterministically() {
    let (mut doc1, text) = doc_with_text("abcdef");
    let mut doc2 = Document::new();
    doc2.set_actor(2).expect("actor");
    doc2.merge(&doc1).expect("seed");

    let mut tx = doc1.begin().expect("begin");
    tx.mark(text, 0, 3, "bold", ScalarValue::Boolean(true))
        .expect("mark bold");
    tx.commit().expect("commit").expect("change");

    let mut tx = doc2.begin().expect("begin");
    tx.mark(text, 2, 5, "em", ScalarValue::Boolean(true))
        .expect("mark em");
    tx.commit().expect("commit").expect("change");

    doc1.merge(&doc2).expect("merge");
    doc2.merge(&doc1).expect("merge back");

    let m1 = doc1.marks(text, None);
    let m2 = doc2.marks(text, None);
    assert_eq!(m1, m2);
    assert_eq!(m1.len(), 2);
    assert_eq!(m1[0].name, "bold");
    assert_eq!(m1[1].name, "em");

    // Index 2 sits inside both ranges.
    let at2 = doc1.marks_at_index(text, 2, None);
    assert_eq!(at2.len(), 2);
    let names: Vec<&str> = at2.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["bold", "em"]);
}

#[test]
fn marks_at_old_heads_exclude_later_marks() {
    let (mut doc, text) = doc_with_text("abcdef");
    let heads_before = doc.heads();

    let mut tx = doc.begin().expect("begin");
    tx.mark(text, 0, 6, "bold", ScalarValue::Boolean(true))
        .expect("mark");
    tx.commit().expect("commit").expect("change");

    assert!(doc
        .marks_at(text, &heads_before)
        .expect("marks at old heads")
        .is_empty());
    assert_eq!(doc.marks(text, None).len(), 1);
    assert_eq!(
        doc.marks_at_index_at(text, 3, &doc.heads())
            .expect("marks at index")
            .len(),
        1
    );
}
