//! Tree diff
//!
//! [`diff`] compares two snapshots node by node, keyed by [`NodeKey`]. A node
//! is *matched* when the same key sits under the same parent, with the same
//! order stamp, kind and locality, and its parent is matched too. Matched
//! nodes only produce content edits (text, marks, tag, attributes).
//! Unmatched nodes are removed and re-inserted as whole subtrees, so a
//! moved or re-stamped node travels as one insert.
//!
//! Changes come out in three groups: removals, then insertions, then
//! content edits. Within a group they follow document order.

use super::change::Change;
use super::tree::{Document, ElementNode, Mark, NodeKey, TextNode, TreeNode};
use std::collections::{HashMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

struct Entry<'a> {
    node: &'a TreeNode,
    parent: &'a ElementNode,
}

/// Visible nodes of a tree, keyed, with their document order
struct TreeIndex<'a> {
    entries: HashMap<&'a NodeKey, Entry<'a>>,
    preorder: Vec<&'a NodeKey>,
}

impl<'a> TreeIndex<'a> {
    fn build(root: &'a ElementNode, include_local: bool) -> Self {
        let mut index = TreeIndex {
            entries: HashMap::new(),
            preorder: Vec::new(),
        };
        index.visit(root, include_local);
        index
    }

    fn visit(&mut self, parent: &'a ElementNode, include_local: bool) {
        for node in &parent.children {
            if !include_local && node.is_local() {
                continue;
            }
            self.entries.insert(node.key(), Entry { node, parent });
            self.preorder.push(node.key());
            if let TreeNode::Element(e) = node {
                self.visit(e, include_local);
            }
        }
    }
}

/// Same identity and position in both trees, ignoring content
fn same_slot(old: &TreeNode, new: &TreeNode) -> bool {
    if old.order() != new.order() || old.is_local() != new.is_local() {
        return false;
    }
    match (old, new) {
        (TreeNode::Element(_), TreeNode::Element(_)) | (TreeNode::Text(_), TreeNode::Text(_)) => true,
        (TreeNode::Ref(a), TreeNode::Ref(b)) => a.ref_key == b.ref_key && a.ref_type == b.ref_type,
        _ => false,
    }
}

/// Changes transforming `old` into `new`
///
/// With `include_local == false`, replica-local nodes of both trees are
/// invisible: they are neither removed nor inserted, and inserted subtrees
/// carry no local descendants.
///
/// # Example
///
/// ```rust
/// use richsync_core::richtext::{diff, patch, Change, Document, NodeKey, TreeNode};
///
/// let old = Document::new();
/// let mut new = old.clone();
/// if let TreeNode::Text(t) = new.root.find_mut(&NodeKey::new("root/p/text")).unwrap() {
///     t.text.push_str("hi");
/// }
///
/// let changes = diff(&old, &new, false);
/// assert!(matches!(&changes[..], [Change::InsertText { offset: 0, .. }]));
/// assert_eq!(patch(&old, &changes, false).unwrap(), new);
/// ```
pub fn diff(old: &Document, new: &Document, include_local: bool) -> Vec<Change> {
    let old_index = TreeIndex::build(&old.root, include_local);
    let new_index = TreeIndex::build(&new.root, include_local);

    // Parents come before children in preorder, so a parent's status is
    // known when its children are checked.
    let mut matched: HashSet<&NodeKey> = HashSet::new();
    for key in &old_index.preorder {
        let old_entry = &old_index.entries[key];
        let Some(new_entry) = new_index.entries.get(key) else { continue };
        let parent = &old_entry.parent.key;
        let parent_ok = parent == &new_entry.parent.key
            && (parent == &old.root.key || matched.contains(parent));
        if parent_ok && same_slot(old_entry.node, new_entry.node) {
            matched.insert(*key);
        }
    }

    let topmost = |entry: &Entry<'_>, root: &NodeKey| {
        entry.parent.key == *root || matched.contains(&entry.parent.key)
    };

    let mut changes = Vec::new();
    for key in &old_index.preorder {
        let entry = &old_index.entries[key];
        if !matched.contains(key) && topmost(entry, &old.root.key) {
            changes.push(Change::remove(entry.node));
        }
    }
    for key in &new_index.preorder {
        let entry = &new_index.entries[key];
        if !matched.contains(key) && topmost(entry, &new.root.key) {
            let node = if include_local {
                entry.node.clone()
            } else {
                entry.node.without_local()
            };
            changes.push(Change::insert(entry.parent, node));
        }
    }

    diff_element_attrs(&old.root, &new.root, &mut changes);
    for key in &old_index.preorder {
        if !matched.contains(key) {
            continue;
        }
        match (old_index.entries[key].node, new_index.entries[key].node) {
            (TreeNode::Text(a), TreeNode::Text(b)) => diff_text(a, b, &mut changes),
            (TreeNode::Element(a), TreeNode::Element(b)) => diff_element_attrs(a, b, &mut changes),
            _ => {}
        }
    }
    changes
}

/// Text and mark edits between two versions of a run
fn diff_text(old: &TextNode, new: &TextNode, changes: &mut Vec<Change>) {
    if old.text != new.text {
        let a: Vec<&str> = old.text.graphemes(true).collect();
        let b: Vec<&str> = new.text.graphemes(true).collect();
        let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
        let max_suffix = a.len().min(b.len()) - prefix;
        let suffix = a
            .iter()
            .rev()
            .zip(b.iter().rev())
            .take(max_suffix)
            .take_while(|(x, y)| x == y)
            .count();

        let deleted = a.len() - prefix - suffix;
        if deleted > 0 {
            changes.push(Change::DeleteText {
                node: old.key.clone(),
                offset: prefix,
                len: deleted,
            });
        }
        let inserted = &b[prefix..b.len() - suffix];
        if !inserted.is_empty() {
            changes.push(Change::InsertText {
                node: old.key.clone(),
                offset: prefix,
                text: inserted.concat(),
            });
        }
    }

    for mark in Mark::ALL {
        match (old.marks.has(mark), new.marks.has(mark)) {
            (false, true) => changes.push(Change::SetMark {
                node: old.key.clone(),
                mark,
            }),
            (true, false) => changes.push(Change::ClearMark {
                node: old.key.clone(),
                mark,
            }),
            _ => {}
        }
    }
}

/// Tag and attribute edits between two versions of an element
fn diff_element_attrs(old: &ElementNode, new: &ElementNode, changes: &mut Vec<Change>) {
    if old.tag != new.tag {
        changes.push(Change::SetTag {
            node: old.key.clone(),
            tag: new.tag.clone(),
        });
    }
    for (name, value) in &new.attrs {
        if old.attrs.get(name) != Some(value) {
            changes.push(Change::SetAttr {
                node: old.key.clone(),
                name: name.clone(),
                value: Some(value.clone()),
            });
        }
    }
    for name in old.attrs.keys() {
        if !new.attrs.contains_key(name) {
            changes.push(Change::SetAttr {
                node: old.key.clone(),
                name: name.clone(),
                value: None,
            });
        }
    }
}
