//! Change replay
//!
//! [`patch`] applies changes in order to a copy of the document; the input
//! is never modified. Two outcomes are distinguished:
//!
//! - **stale** changes target a node that is already gone (removed by a
//!   change this replica saw first). They are skipped with a `debug` event
//!   and the rest of the batch still applies.
//! - **malformed** changes can never be valid: the target has the wrong
//!   kind, a text range runs past the end of the run, or the change tries to
//!   remove the root. They fail the whole patch with a [`PatchError`].
//!
//! Patch does not normalize. Merging runs inside patch would rename the
//! targets of changes still in flight; callers normalize the result for
//! presentation and checksums.

use super::change::Change;
use super::tree::{Document, ElementNode, NodeKey, RefMarker, TextNode, TreeNode};
use crate::error::PatchError;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

/// Apply `changes` to a copy of `doc`
///
/// With `grow_refs`, every ref marker that arrives through an insert is
/// registered in the document's pointer bookkeeping.
///
/// # Errors
///
/// Returns a [`PatchError`] for the first malformed change. Stale changes
/// are not errors.
///
/// # Example
///
/// ```rust
/// use richsync_core::richtext::{patch, Change, Document, NodeKey};
///
/// let doc = Document::new();
/// let changes = vec![
///     Change::InsertText { node: NodeKey::new("root/p/text"), offset: 0, text: "hi".into() },
///     // Already gone: skipped, not an error.
///     Change::RemoveNode { node: NodeKey::new("nowhere") },
/// ];
/// let patched = patch(&doc, &changes, false).unwrap();
/// assert_eq!(patched.plaintext(), "hi");
/// ```
pub fn patch(doc: &Document, changes: &[Change], grow_refs: bool) -> Result<Document, PatchError> {
    let mut out = doc.clone();
    for change in changes {
        apply(&mut out, change, grow_refs)?;
    }
    Ok(out)
}

fn skip_stale(change: &Change) {
    debug!(op = change.op(), target = %change.target(), "skipping stale change");
}

fn apply(doc: &mut Document, change: &Change, grow_refs: bool) -> Result<(), PatchError> {
    match change {
        Change::InsertText { node, offset, text } => {
            let Some(run) = text_mut(doc, node, change.op())? else {
                skip_stale(change);
                return Ok(());
            };
            let at = byte_offset(run, *offset, *offset)?;
            run.text.insert_str(at, text);
        }
        Change::DeleteText { node, offset, len } => {
            let Some(run) = text_mut(doc, node, change.op())? else {
                skip_stale(change);
                return Ok(());
            };
            let end = offset + len;
            let from = byte_offset(run, *offset, end)?;
            let to = byte_offset(run, end, end)?;
            run.text.replace_range(from..to, "");
        }
        Change::SetMark { node, mark } | Change::ClearMark { node, mark } => {
            let on = matches!(change, Change::SetMark { .. });
            match text_mut(doc, node, change.op())? {
                Some(run) => run.marks.set(*mark, on),
                None => skip_stale(change),
            }
        }
        Change::InsertNode { parent, node } => insert(doc, parent, node.clone(), change, grow_refs)?,
        Change::InsertRef { parent, marker } => {
            insert(doc, parent, TreeNode::Ref(marker.clone()), change, grow_refs)?
        }
        Change::RemoveNode { node } => {
            if node == &doc.root.key {
                return Err(PatchError::RootTarget("removeNode"));
            }
            match doc.root.remove(node) {
                Some(removed) => forget_refs(doc, &removed),
                None => skip_stale(change),
            }
        }
        Change::RemoveRef { node } => {
            match doc.find(node) {
                None if node == &doc.root.key => {
                    return Err(kind_mismatch(node, change, "ref", "element"));
                }
                None => {
                    skip_stale(change);
                    return Ok(());
                }
                Some(TreeNode::Ref(_)) => {}
                Some(other) => return Err(kind_mismatch(node, change, "ref", other.kind())),
            }
            if let Some(removed) = doc.root.remove(node) {
                forget_refs(doc, &removed);
            }
        }
        Change::SetTag { node, tag } => match element_mut(doc, node, change)? {
            Some(element) => element.tag = tag.clone(),
            None => skip_stale(change),
        },
        Change::SetAttr { node, name, value } => match element_mut(doc, node, change)? {
            Some(element) => match value {
                Some(v) => {
                    element.attrs.insert(name.clone(), v.clone());
                }
                None => {
                    element.attrs.remove(name);
                }
            },
            None => skip_stale(change),
        },
    }
    Ok(())
}

fn insert(
    doc: &mut Document,
    parent: &NodeKey,
    node: TreeNode,
    change: &Change,
    grow_refs: bool,
) -> Result<(), PatchError> {
    if node.key() == &doc.root.key {
        return Err(PatchError::RootTarget(change.op()));
    }
    if shared_contains(&doc.root, node.key()) {
        // Delivered twice, or already inserted by a concurrent path.
        skip_stale(change);
        return Ok(());
    }
    if element_mut(doc, parent, change)?.is_none() {
        skip_stale(change);
        return Ok(());
    }
    // Keys of the incoming subtree may still be held by replica-local
    // content (a local draft that has since been shared). The incoming
    // nodes replace it.
    for key in subtree_keys(&node) {
        if shared_contains(&doc.root, &key) {
            continue;
        }
        if let Some(occupant) = doc.root.remove(&key) {
            debug!(key = %key, "replacing local node");
            forget_refs(doc, &occupant);
        }
    }
    let markers = if grow_refs { collect_markers(&node) } else { Vec::new() };
    match element_mut(doc, parent, change)? {
        Some(element) => element.insert_child(node),
        None => {
            skip_stale(change);
            return Ok(());
        }
    }
    for marker in &markers {
        doc.track_ref(marker);
    }
    Ok(())
}

/// True when `key` is reachable from `element` without passing through
/// replica-local content
fn shared_contains(element: &ElementNode, key: &NodeKey) -> bool {
    element.children.iter().filter(|c| !c.is_local()).any(|child| {
        child.key() == key || child.as_element().is_some_and(|e| shared_contains(e, key))
    })
}

fn kind_mismatch(key: &NodeKey, change: &Change, expected: &'static str, found: &'static str) -> PatchError {
    PatchError::KindMismatch {
        key: key.clone(),
        op: change.op(),
        expected,
        found,
    }
}

/// The text run `key`, `None` when it no longer exists
fn text_mut<'a>(
    doc: &'a mut Document,
    key: &NodeKey,
    op: &'static str,
) -> Result<Option<&'a mut TextNode>, PatchError> {
    let mismatch = |found| PatchError::KindMismatch {
        key: key.clone(),
        op,
        expected: "text",
        found,
    };
    if key == &doc.root.key {
        return Err(mismatch("element"));
    }
    match doc.root.find_mut(key) {
        None => Ok(None),
        Some(TreeNode::Text(t)) => Ok(Some(t)),
        Some(other) => Err(mismatch(other.kind())),
    }
}

/// The element `key` (the root included), `None` when it no longer exists
fn element_mut<'a>(
    doc: &'a mut Document,
    key: &NodeKey,
    change: &Change,
) -> Result<Option<&'a mut ElementNode>, PatchError> {
    if let Some(found) = doc.find(key) {
        if !matches!(found, TreeNode::Element(_)) {
            return Err(kind_mismatch(key, change, "element", found.kind()));
        }
    }
    Ok(doc.root.find_element_mut(key))
}

/// Byte index of grapheme `offset`, checking `end` against the run length
fn byte_offset(run: &TextNode, offset: usize, end: usize) -> Result<usize, PatchError> {
    let mut boundaries = run.text.grapheme_indices(true).map(|(i, _)| i);
    let length = run.text.graphemes(true).count();
    if offset > end || end > length {
        return Err(PatchError::OffsetOutOfBounds {
            key: run.key.clone(),
            start: offset,
            end,
            length,
        });
    }
    Ok(boundaries.nth(offset).unwrap_or(run.text.len()))
}

fn subtree_keys(node: &TreeNode) -> Vec<NodeKey> {
    let mut out = vec![node.key().clone()];
    if let TreeNode::Element(e) = node {
        out.extend(e.children.iter().flat_map(subtree_keys));
    }
    out
}

fn collect_markers(node: &TreeNode) -> Vec<RefMarker> {
    let mut out = Vec::new();
    fn walk(node: &TreeNode, out: &mut Vec<RefMarker>) {
        match node {
            TreeNode::Ref(marker) => out.push(marker.clone()),
            TreeNode::Element(e) => e.children.iter().for_each(|c| walk(c, out)),
            TreeNode::Text(_) => {}
        }
    }
    walk(node, &mut out);
    out
}

/// Drop pointer bookkeeping for markers in a removed subtree
fn forget_refs(doc: &mut Document, removed: &TreeNode) {
    for marker in collect_markers(removed) {
        doc.pointers.remove(&marker.key);
    }
}
