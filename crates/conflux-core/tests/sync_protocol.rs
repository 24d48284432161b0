use conflux_core::document::Document;
use conflux_core::ids::ObjId;
use conflux_core::sync::{Capability, Message, SyncState};
use conflux_core::value::ScalarValue;

fn commit_put(doc: &mut Document, key: &str, value: &str) {
    let mut tx = doc.begin().expect("begin");
    tx.put(ObjId::Root, key, ScalarValue::Str(value.into()));
    tx.commit().expect("commit").expect("change");
}

/// Drives one direction of the exchange through the wire format; returns
/// whether a message actually travelled.
fn sync_round_trip(
    from: &mut Document,
    from_state: &mut SyncState,
    to: &mut Document,
    to_state: &mut SyncState,
) -> bool {
    let Some(msg) = from
        .generate_sync_message(from_state)
        .expect("generate message")
    else {
        return false;
    };
    let encoded = msg.encode().expect("encode message");
    let decoded = Message::decode(&encoded).expect("decode message");
    to.receive_sync_message(to_state, decoded)
        .expect("receive message");
    true
}

#[test]
fn two_peers_converge_and_fall_silent() {
    let mut p1 = Document::new();
    let mut p2 = Document::new();
    p2.set_actor(2).expect("actor");

    commit_put(&mut p1, "a", "one");
    commit_put(&mut p2, "b", "two");

    let mut s12 = SyncState::new();
    let mut s21 = SyncState::new();
    let caps = vec![Capability::MessageV1, Capability::MessageV2];
    s12.their_capabilities = Some(caps.clone());
    s21.their_capabilities = Some(caps);

    let mut quiet_rounds = 0;
    for _ in 0..20 {
        let moved1 = sync_round_trip(&mut p1, &mut s12, &mut p2, &mut s21);
        let moved2 = sync_round_trip(&mut p2, &mut s21, &mut p1, &mut s12);
        if !moved1 && !moved2 {
            quiet_rounds += 1;
            if quiet_rounds == 2 {
                break;
            }
        }
    }
    assert_eq!(quiet_rounds, 2, "peers never fell silent");

    let b = p1.get_map(ObjId::Root, "b", None).expect("p1 sees b");
    assert_eq!(b.as_str(), Some("two"));
    let a = p2.get_map(ObjId::Root, "a", None).expect("p2 sees a");
    assert_eq!(a.as_str(), Some("one"));
    assert_eq!(p1.heads(), p2.heads());

    // Converged peers agree on the shared-heads estimate too.
    assert_eq!(s12.shared_heads, s21.shared_heads);
}

#[test]
fn in_flight_silencing_suppresses_the_second_message() {
    let mut doc = Document::new();
    commit_put(&mut doc, "k", "v");

    let mut state = SyncState::new();
    state.their_capabilities = Some(vec![Capability::MessageV1]);
    state.their_need = Some(Vec::new());
    state.their_have = Some(Vec::new());

    let first = doc
        .generate_sync_message(&mut state)
        .expect("generate first");
    assert!(first.is_some());

    let second = doc
        .generate_sync_message(&mut state)
        .expect("generate second");
    assert!(second.is_none(), "second message while in flight must be silenced");
}

#[test]
fn message_generation_is_deterministic() {
    let mut doc = Document::new();
    for v in ["a", "b", "c"] {
        commit_put(&mut doc, "k", v);
    }

    let mk_state = || {
        let mut s = SyncState::new();
        s.their_capabilities = Some(vec![Capability::MessageV1]);
        s.their_need = Some(Vec::new());
        s.their_have = Some(Vec::new());
        s
    };

    let m1 = doc
        .generate_sync_message(&mut mk_state())
        .expect("generate 1")
        .expect("message 1");
    let m2 = doc
        .generate_sync_message(&mut mk_state())
        .expect("generate 2")
        .expect("message 2");
    assert_eq!(
        m1.encode().expect("encode 1"),
        m2.encode().expect("encode 2")
    );
}

#[test]
fn empty_peer_with_v2_gets_the_full_document() {
    let mut doc = Document::new();
    commit_put(&mut doc, "k", "v");

    let mut state = SyncState::new();
    state.their_heads = Some(Vec::new());
    state.their_capabilities = Some(vec![Capability::MessageV1, Capability::MessageV2]);

    let msg = doc
        .generate_sync_message(&mut state)
        .expect("generate")
        .expect("message");
    assert_eq!(msg.version, conflux_core::sync::MessageVersion::V2);
    assert!(msg.document_payload.is_some());
    assert!(msg.change_payload.is_none());

    // A V1-only peer gets a change list instead.
    let mut state = SyncState::new();
    state.their_heads = Some(Vec::new());
    state.their_capabilities = Some(vec![Capability::MessageV1]);
    state.their_need = Some(Vec::new());
    state.their_have = Some(Vec::new());
    let msg = doc
        .generate_sync_message(&mut state)
        .expect("generate")
        .expect("message");
    assert_eq!(msg.version, conflux_core::sync::MessageVersion::V1);
    assert!(msg.document_payload.is_none());
    assert!(msg.change_payload.is_some());
}

#[test]
fn receive_absorbs_peer_view_and_resets_sent_hashes() {
    let mut sender = Document::new();
    commit_put(&mut sender, "k", "v");
    let mut sender_state = SyncState::new();
    let msg = sender
        .generate_sync_message(&mut sender_state)
        .expect("generate")
        .expect("message");
    assert!(!sender_state.sent_hashes.is_empty());

    let mut receiver = Document::new();
    receiver.set_actor(2).expect("actor");
    let mut receiver_state = SyncState::new();
    receiver
        .receive_sync_message(&mut receiver_state, msg)
        .expect("receive");

    assert_eq!(receiver_state.their_heads.as_deref(), Some(&sender.heads()[..]));
    assert!(receiver_state.their_have.is_some());
    assert_eq!(
        receiver_state.their_capabilities.as_deref(),
        Some(&[Capability::MessageV1, Capability::MessageV2][..])
    );
    // The initial handshake carried the change list, so the receiver now
    // holds the sender's state and the shared heads match.
    assert_eq!(receiver.heads(), sender.heads());
    assert_eq!(receiver_state.shared_heads, sender.heads());
    assert!(receiver_state.sent_hashes.is_empty());
}

#[test]
fn sync_state_survives_persistence_between_sessions() {
    let mut p1 = Document::new();
    let mut p2 = Document::new();
    p2.set_actor(2).expect("actor");
    commit_put(&mut p1, "a", "one");

    let mut s12 = SyncState::new();
    let mut s21 = SyncState::new();
    for _ in 0..5 {
        let m1 = sync_round_trip(&mut p1, &mut s12, &mut p2, &mut s21);
        let m2 = sync_round_trip(&mut p2, &mut s21, &mut p1, &mut s12);
        if !m1 && !m2 {
            break;
        }
    }
    assert!(!s12.shared_heads.is_empty());

    // Persist, restore, and keep syncing after new local edits.
    let restored = SyncState::decode(&s12.encode()).expect("decode state");
    assert_eq!(restored.shared_heads, s12.shared_heads);
    let mut s12 = restored;

    commit_put(&mut p1, "c", "three");
    for _ in 0..5 {
        let m1 = sync_round_trip(&mut p1, &mut s12, &mut p2, &mut s21);
        let m2 = sync_round_trip(&mut p2, &mut s21, &mut p1, &mut s12);
        if !m1 && !m2 {
            break;
        }
    }
    let c = p2.get_map(ObjId::Root, "c", None).expect("p2 sees c");
    assert_eq!(c.as_str(), Some("three"));
}
