//! Ref-marker lifecycle
//!
//! Ref markers point at other documents by key. This module covers what
//! happens to them over a document's life:
//!
//! - [`fill_refs`] collects every referenced key, so a host can keep the
//!   targets alive.
//! - [`rewrite_refs`] retargets markers when a document is duplicated and
//!   drops markers whose target could not be carried over.
//! - [`Document::expire_ref`] records that a target was tombstoned. The
//!   marker is kept for a grace window, since edits made before the deletion
//!   may still be in flight, and then [`Document::gc`] purges it.

use super::tree::{Document, ElementNode, NodeKey, Pointer, TreeNode};
use crate::config::EngineConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Add the target key of every ref marker outside replica-local content
/// to `refs`
pub fn fill_refs(doc: &Document, refs: &mut BTreeSet<String>) {
    refs.extend(doc.non_local_markers().into_iter().map(|m| m.ref_key.clone()));
}

/// Copy of `doc` with ref targets rewritten through `mapping`
///
/// Markers whose target is in `delete` are removed along with their
/// pointers. Targets missing from `mapping` are left unchanged.
///
/// # Example
///
/// ```rust
/// use std::collections::{HashMap, HashSet};
/// use richsync_core::orderstamp;
/// use richsync_core::richtext::{rewrite_refs, Document, NodeKey, RefMarker, RefType};
///
/// let mut doc = Document::new();
/// let marker = RefMarker::new(NodeKey::new("r1"), orderstamp::present(), "old", RefType::InternalDoc);
/// doc.track_ref(&marker);
/// doc.root.children[0].as_element_mut().unwrap().insert_child(marker.into());
///
/// let mapping = HashMap::from([("old".to_string(), "new".to_string())]);
/// let copy = rewrite_refs(&doc, &mapping, &HashSet::new());
/// assert_eq!(copy.pointers[&NodeKey::new("r1")].ref_key, "new");
/// ```
pub fn rewrite_refs(doc: &Document, mapping: &HashMap<String, String>, delete: &HashSet<String>) -> Document {
    let mut out = doc.clone();
    let mut removed = Vec::new();
    rewrite_element(&mut out.root, mapping, delete, &mut removed);
    for key in &removed {
        out.pointers.remove(key);
    }
    for pointer in out.pointers.values_mut() {
        if let Some(target) = mapping.get(&pointer.ref_key) {
            pointer.ref_key = target.clone();
        }
    }
    out
}

fn rewrite_element(
    element: &mut ElementNode,
    mapping: &HashMap<String, String>,
    delete: &HashSet<String>,
    removed: &mut Vec<NodeKey>,
) {
    element.children.retain(|child| match child {
        TreeNode::Ref(marker) if delete.contains(&marker.ref_key) => {
            removed.push(marker.key.clone());
            false
        }
        _ => true,
    });
    for child in element.children.iter_mut() {
        match child {
            TreeNode::Ref(marker) => {
                if let Some(target) = mapping.get(&marker.ref_key) {
                    marker.ref_key = target.clone();
                }
            }
            TreeNode::Element(e) => rewrite_element(e, mapping, delete, removed),
            TreeNode::Text(_) => {}
        }
    }
}

/// Expired strictly more than `grace` before `now`
fn is_expired(pointer: &Pointer, now: DateTime<Utc>, grace: Duration) -> bool {
    pointer
        .expiration
        .and_then(|at| at.checked_add_signed(grace))
        .is_some_and(|deadline| deadline < now)
}

impl Document {
    /// Mark every pointer to `ref_key` as expiring at `at`
    ///
    /// An earlier expiration already on record is kept. Returns the number
    /// of pointers whose expiration changed.
    pub fn expire_ref(&mut self, ref_key: &str, at: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for pointer in self.pointers.values_mut().filter(|p| p.ref_key == ref_key) {
            match pointer.expiration {
                Some(existing) if existing <= at => {}
                _ => {
                    pointer.expiration = Some(at);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// True when at least one pointer expired more than `grace` before `now`
    pub fn need_gc_at(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.pointers
            .values()
            .any(|p| is_expired(p, now, grace))
    }

    /// Copy of the document without expired pointers and their markers
    ///
    /// Returns `None` when nothing is expired.
    pub fn gc_at(&self, now: DateTime<Utc>, grace: Duration) -> Option<Document> {
        let expired: HashSet<NodeKey> = self
            .pointers
            .iter()
            .filter(|(_, p)| is_expired(p, now, grace))
            .map(|(key, _)| key.clone())
            .collect();
        if expired.is_empty() {
            return None;
        }

        let mut out = self.clone();
        out.pointers.retain(|key, _| !expired.contains(key));
        let mut markers = 0;
        for key in &expired {
            if out.root.remove(key).is_some() {
                markers += 1;
            }
        }
        debug!(pointers = expired.len(), markers, "purged expired refs");
        Some(out)
    }

    /// [`Document::need_gc_at`] against the wall clock
    pub fn need_gc(&self, config: &EngineConfig) -> bool {
        self.need_gc_at(Utc::now(), config.gc_grace_chrono())
    }

    /// [`Document::gc_at`] against the wall clock
    pub fn gc(&self, config: &EngineConfig) -> Option<Document> {
        self.gc_at(Utc::now(), config.gc_grace_chrono())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderstamp::OrderStamp;
    use crate::richtext::tree::{RefMarker, RefType, TextNode};
    use chrono::TimeZone;

    fn marker(key: &str, target: &str) -> RefMarker {
        RefMarker::new(NodeKey::new(key), OrderStamp::from(key), target, RefType::InternalDoc)
    }

    fn doc_with_refs(markers: &[RefMarker]) -> Document {
        let mut doc = Document::new();
        let para = doc.root.children[0].as_element_mut().unwrap();
        para.insert_child(TextNode::new(NodeKey::new("t1"), OrderStamp::from("a"), "see").into());
        for m in markers {
            para.insert_child(m.clone().into());
        }
        for m in markers {
            doc.track_ref(m);
        }
        doc
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_fill_refs_skips_local() {
        let mut local = marker("r3", "doc-c");
        local.is_local = true;
        let doc = doc_with_refs(&[marker("r1", "doc-a"), marker("r2", "doc-b"), local]);
        let mut refs = BTreeSet::new();
        fill_refs(&doc, &mut refs);
        assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec!["doc-a", "doc-b"]);
    }

    #[test]
    fn test_fill_refs_skips_markers_under_local_content() {
        let mut doc = doc_with_refs(&[marker("r1", "doc-a")]);
        let draft = ElementNode {
            is_local: true,
            ..ElementNode::tagged(NodeKey::new("draft"), OrderStamp::from("z"), "p")
        }
        .with_children([marker("r9", "doc-z").into()]);
        doc.root.insert_child(draft.into());

        let mut refs = BTreeSet::new();
        fill_refs(&doc, &mut refs);
        assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec!["doc-a"]);
    }

    #[test]
    fn test_rewrite_and_delete() {
        let doc = doc_with_refs(&[marker("r1", "doc-a"), marker("r2", "doc-b")]);
        let mapping = HashMap::from([("doc-a".to_string(), "doc-x".to_string())]);
        let delete = HashSet::from(["doc-b".to_string()]);
        let out = rewrite_refs(&doc, &mapping, &delete);

        assert!(!out.contains(&NodeKey::new("r2")));
        assert!(!out.pointers.contains_key(&NodeKey::new("r2")));
        let r1 = match out.find(&NodeKey::new("r1")) {
            Some(TreeNode::Ref(m)) => m,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(r1.ref_key, "doc-x");
        assert_eq!(out.pointers[&NodeKey::new("r1")].ref_key, "doc-x");
        // Input untouched
        assert!(doc.contains(&NodeKey::new("r2")));
    }

    #[test]
    fn test_gc_respects_grace_window() {
        let mut doc = doc_with_refs(&[marker("r1", "doc-a"), marker("r2", "doc-b")]);
        let grace = Duration::minutes(10);
        assert!(!doc.need_gc_at(at(1_000_000), grace));

        assert_eq!(doc.expire_ref("doc-a", at(1_000)), 1);
        assert!(!doc.need_gc_at(at(1_000 + 600), grace));
        assert!(doc.gc_at(at(1_000 + 600), grace).is_none());
        assert!(doc.need_gc_at(at(1_000 + 601), grace));

        let collected = doc.gc_at(at(1_000 + 601), grace).unwrap();
        assert!(!collected.contains(&NodeKey::new("r1")));
        assert!(collected.contains(&NodeKey::new("r2")));
        assert_eq!(collected.pointers.len(), 1);
        assert!(!collected.need_gc_at(at(1_000_000), grace));
    }

    #[test]
    fn test_expire_keeps_earliest() {
        let mut doc = doc_with_refs(&[marker("r1", "doc-a")]);
        assert_eq!(doc.expire_ref("doc-a", at(500)), 1);
        assert_eq!(doc.expire_ref("doc-a", at(900)), 0);
        assert_eq!(doc.pointers[&NodeKey::new("r1")].expiration, Some(at(500)));
        assert_eq!(doc.expire_ref("doc-a", at(100)), 1);
        assert_eq!(doc.expire_ref("unknown", at(100)), 0);
    }

    #[test]
    fn test_wall_clock_gc() {
        let mut doc = doc_with_refs(&[marker("r1", "doc-a")]);
        doc.expire_ref("doc-a", at(0));
        let config = EngineConfig::default();
        assert!(doc.need_gc(&config));
        assert!(doc.gc(&config).unwrap().pointers.is_empty());
    }
}
