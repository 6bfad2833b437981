use chrono::{Duration, TimeZone, Utc};
use richsync_core::orderstamp;
use richsync_core::richtext::{fill_refs, patch, Change, Document, NodeKey, RefMarker, RefType};
use richsync_core::value::EncodeOptions;
use richsync_core::EngineConfig;
use std::collections::BTreeSet;

fn with_marker(target: &str) -> Document {
    let marker = RefMarker::new(NodeKey::new("mention-1"), orderstamp::present(), target, RefType::InternalDoc);
    patch(
        &Document::new(),
        &[Change::InsertRef {
            parent: NodeKey::new("root/p"),
            marker,
        }],
        true,
    )
    .unwrap()
}

#[test]
fn marker_survives_grace_window_then_collected() {
    let config = EngineConfig::from_json(r#"{"gc_grace_ms": 600000}"#).unwrap();
    let grace = Duration::milliseconds(config.gc_grace_ms as i64);
    let deleted_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    let mut doc = with_marker("doc-b");
    assert_eq!(doc.pointers.len(), 1);
    assert_eq!(doc.expire_ref("doc-b", deleted_at), 1);

    for offset in [0, 60, 599, 600] {
        let now = deleted_at + Duration::seconds(offset);
        assert!(!doc.need_gc_at(now, grace), "collected too early at +{}s", offset);
        assert!(doc.gc_at(now, grace).is_none());
    }

    let now = deleted_at + Duration::seconds(601);
    assert!(doc.need_gc_at(now, grace));
    let collected = doc.gc_at(now, grace).unwrap();
    assert!(!collected.contains(&NodeKey::new("mention-1")));
    assert!(collected.pointers.is_empty());

    let mut refs = BTreeSet::new();
    fill_refs(&collected, &mut refs);
    assert!(refs.is_empty());
}

#[test]
fn expiry_travels_with_the_document() {
    let mut doc = with_marker("doc-b");
    let deleted_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    doc.expire_ref("doc-b", deleted_at);

    let json = doc.encode(&EncodeOptions::only_non_local()).unwrap();
    let back = Document::decode(&json).unwrap();
    assert_eq!(back.pointers[&NodeKey::new("mention-1")].expiration, Some(deleted_at));
    assert!(back.need_gc(&EngineConfig::default()));
}

#[test]
fn live_refs_are_never_collected() {
    let doc = with_marker("doc-b");
    let far_future = Utc.timestamp_opt(4_000_000_000, 0).unwrap();
    assert!(!doc.need_gc_at(far_future, Duration::zero()));

    let mut refs = BTreeSet::new();
    fill_refs(&doc, &mut refs);
    assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec!["doc-b".to_string()]);
}
