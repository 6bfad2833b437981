//! Canonicalization of richtext trees
//!
//! Concurrent patches can leave a tree valid but redundant: two adjacent
//! text runs with the same formatting, a paragraph with nothing in it, a
//! list item outside any list. [`normalize`] rewrites such trees into a
//! single canonical shape, which both presentation and checksums rely on.
//!
//! Rules, applied bottom-up until nothing changes:
//!
//! - children are sorted by `(order, key)`,
//! - adjacent text runs with the same marks and locality are merged (the
//!   left run keeps its key),
//! - empty text runs are dropped unless they are an element's only child,
//! - empty elements are dropped, except void tags (`hr`, `br`, `img`,
//!   `object`), which are kept, and text containers (`p`, `h1`, `h2`, `li`),
//!   which get an empty placeholder run,
//! - `li` outside a list is wrapped in `ul`; non-`li` children of a list
//!   become (`p`) or are wrapped in (anything else) `li`,
//! - a `p` inside `li` is unwrapped; block elements inside `p`, `h1` or
//!   `h2` move up next to their former parent,
//! - text and refs directly under the root are wrapped in `p`,
//! - an only, empty text run takes its parent's locality,
//! - an empty root gets the initial paragraph back.
//!
//! Nodes created by normalization get keys derived from the node they wrap
//! or replace, so replicas normalizing the same tree agree on the result.
//!
//! # Example
//!
//! ```rust
//! use richsync_core::richtext::{normalize, Document, ElementNode, NodeKey, TextNode};
//! use richsync_core::orderstamp::OrderStamp;
//!
//! let p = ElementNode::tagged(NodeKey::new("p"), OrderStamp::from("a"), "p").with_children([
//!     TextNode::new(NodeKey::new("t1"), OrderStamp::from("a"), "hel").into(),
//!     TextNode::new(NodeKey::new("t2"), OrderStamp::from("b"), "lo").into(),
//! ]);
//! let mut doc = Document::new();
//! doc.root.children = vec![p.into()];
//!
//! let normalized = normalize(&doc);
//! let p = normalized.root.children[0].as_element().unwrap();
//! assert_eq!(p.children.len(), 1);
//! assert_eq!(p.children[0].as_text().unwrap().text, "hello");
//! ```

use super::tree::{init_root, Document, ElementNode, TextNode, TreeNode};
use crate::orderstamp;
use tracing::trace;

/// Elements that are meaningful without children
pub const VOID_TAGS: &[&str] = &["hr", "br", "img", "object"];

/// Elements that always hold at least one text run
pub const TEXT_CONTAINER_TAGS: &[&str] = &["p", "h1", "h2", "li"];

/// Elements that can't nest inside a paragraph
pub const BLOCK_TAGS: &[&str] = &["p", "h1", "h2", "ul", "ol"];

const LIST_TAGS: &[&str] = &["ul", "ol"];
const PARAGRAPH_TAGS: &[&str] = &["p", "h1", "h2"];

fn has_tag(node: &TreeNode, tags: &[&str]) -> bool {
    node.tag().map_or(false, |t| tags.contains(&t))
}

fn element_has_tag(element: &ElementNode, tags: &[&str]) -> bool {
    element.tag().map_or(false, |t| tags.contains(&t))
}

/// Canonical form of a document
///
/// Pure and idempotent: `normalize(&normalize(d)) == normalize(d)`.
pub fn normalize(doc: &Document) -> Document {
    let mut out = doc.clone();
    let mut iterations = 0usize;
    loop {
        iterations += 1;
        let changes = normalize_root(&mut out.root);
        trace!(iterations, changes, "normalization pass");
        if changes == 0 {
            break;
        }
    }
    out
}

/// True when `normalize(doc)` would return `doc` unchanged
pub fn is_normalized(doc: &Document) -> bool {
    let mut copy = doc.root.clone();
    normalize_root(&mut copy) == 0
}

fn normalize_root(root: &mut ElementNode) -> usize {
    let mut changes = normalize_element(root);
    changes += wrap_root_inlines(root);
    if root.children.is_empty() {
        root.children = init_root().children;
        changes += 1;
    }
    changes
}

/// One bottom-up pass over `element`, returning the number of rewrites
fn normalize_element(element: &mut ElementNode) -> usize {
    let mut changes = 0;
    for child in element.children.iter_mut() {
        if let TreeNode::Element(e) = child {
            changes += normalize_element(e);
        }
    }

    changes += lift_blocks(element);
    if element.tag() == Some("li") {
        changes += unwrap_paragraphs(element);
    }
    if element_has_tag(element, LIST_TAGS) {
        changes += fix_list_children(element);
    } else {
        changes += wrap_orphan_items(element);
    }
    changes += fill_or_drop_empty(element);
    changes += sort_children(element);
    changes += merge_text(element);
    changes += strip_empty_text(element);
    changes += inherit_locality(element);
    changes
}

/// Move block elements out of paragraph-like children into `element`
fn lift_blocks(element: &mut ElementNode) -> usize {
    let mut lifted = Vec::new();
    for child in element.children.iter_mut() {
        let TreeNode::Element(para) = child else { continue };
        if !element_has_tag(para, PARAGRAPH_TAGS) {
            continue;
        }
        if !para.children.iter().any(|c| has_tag(c, BLOCK_TAGS)) {
            continue;
        }
        let parent_order = para.order.clone();
        let (blocks, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut para.children)
            .into_iter()
            .partition(|c| has_tag(c, BLOCK_TAGS));
        para.children = rest;
        for mut block in blocks {
            block.set_order(parent_order.nest(block.order()));
            lifted.push(block);
        }
    }
    let count = lifted.len();
    for node in lifted {
        element.insert_child(node);
    }
    count
}

/// Replace `p` children of a list item with their content
fn unwrap_paragraphs(item: &mut ElementNode) -> usize {
    if !item.children.iter().any(|c| c.tag() == Some("p")) {
        return 0;
    }
    let mut count = 0;
    let children = std::mem::take(&mut item.children);
    for child in children {
        match child {
            TreeNode::Element(p) if p.tag() == Some("p") => {
                count += 1;
                for mut inner in p.children {
                    inner.set_order(p.order.nest(inner.order()));
                    item.children.push(inner);
                }
            }
            other => item.children.push(other),
        }
    }
    item.sort_children();
    count
}

/// Make every child of a list a list item
fn fix_list_children(list: &mut ElementNode) -> usize {
    let mut count = 0;
    for child in list.children.iter_mut() {
        if child.tag() == Some("li") {
            continue;
        }
        count += 1;
        if let TreeNode::Element(e) = child {
            if e.tag() == Some("p") {
                e.tag = Some("li".to_string());
                continue;
            }
        }
        let inner = std::mem::replace(child, placeholder_node());
        let wrapper = ElementNode::tagged(inner.key().derive("li"), inner.order().clone(), "li")
            .with_children([inner]);
        *child = wrapper.into();
    }
    count
}

/// Wrap list items that aren't inside a list
fn wrap_orphan_items(element: &mut ElementNode) -> usize {
    let mut count = 0;
    for child in element.children.iter_mut() {
        if child.tag() != Some("li") {
            continue;
        }
        count += 1;
        let item = std::mem::replace(child, placeholder_node());
        let list = ElementNode::tagged(item.key().derive("ul"), item.order().clone(), "ul")
            .with_children([item]);
        *child = list.into();
    }
    count
}

/// Text and refs directly under the root go into paragraphs
fn wrap_root_inlines(root: &mut ElementNode) -> usize {
    let mut count = 0;
    for child in root.children.iter_mut() {
        if matches!(child, TreeNode::Element(_)) {
            continue;
        }
        count += 1;
        let inline = std::mem::replace(child, placeholder_node());
        let para = ElementNode::tagged(inline.key().derive("p"), inline.order().clone(), "p");
        let para = ElementNode {
            is_local: inline.is_local(),
            ..para
        }
        .with_children([inline]);
        *child = para.into();
    }
    count
}

/// Give empty text containers a placeholder run and drop other empty elements
fn fill_or_drop_empty(element: &mut ElementNode) -> usize {
    let mut count = 0;
    element.children.retain_mut(|child| {
        let TreeNode::Element(e) = child else { return true };
        if !e.children.is_empty() || element_has_tag(e, VOID_TAGS) {
            return true;
        }
        count += 1;
        if element_has_tag(e, TEXT_CONTAINER_TAGS) {
            let mut text = TextNode::new(e.key.derive("text"), orderstamp::past(), "");
            text.is_local = e.is_local;
            e.children.push(text.into());
            true
        } else {
            false
        }
    });
    count
}

fn sort_children(element: &mut ElementNode) -> usize {
    let sorted = element
        .children
        .windows(2)
        .all(|w| (w[0].order(), w[0].key()) <= (w[1].order(), w[1].key()));
    if sorted {
        return 0;
    }
    element.sort_children();
    1
}

/// Merge adjacent runs with identical formatting and locality
fn merge_text(element: &mut ElementNode) -> usize {
    let mut count = 0;
    let mut merged: Vec<TreeNode> = Vec::with_capacity(element.children.len());
    for child in std::mem::take(&mut element.children) {
        if let (Some(TreeNode::Text(prev)), TreeNode::Text(next)) = (merged.last_mut(), &child) {
            if prev.marks == next.marks && prev.is_local == next.is_local {
                prev.text.push_str(&next.text);
                count += 1;
                continue;
            }
        }
        merged.push(child);
    }
    element.children = merged;
    count
}

/// Drop empty runs that share their parent with other nodes
fn strip_empty_text(element: &mut ElementNode) -> usize {
    if element.children.len() < 2 {
        return 0;
    }
    let is_empty_text = |c: &TreeNode| matches!(c, TreeNode::Text(t) if t.text.is_empty());
    let empties = element.children.iter().filter(|c| is_empty_text(c)).count();
    if empties == 0 {
        return 0;
    }
    if empties == element.children.len() {
        // Keep the first run so the element isn't left empty.
        element.children.truncate(1);
        return empties - 1;
    }
    element.children.retain(|c| !is_empty_text(c));
    empties
}

/// An element's only, empty run takes the element's locality
fn inherit_locality(element: &mut ElementNode) -> usize {
    let parent_local = element.is_local;
    match element.children.as_mut_slice() {
        [TreeNode::Text(t)] if t.text.is_empty() && t.is_local != parent_local => {
            t.is_local = parent_local;
            1
        }
        _ => 0,
    }
}

/// Temporary occupant of a slot whose node is being moved
fn placeholder_node() -> TreeNode {
    TextNode::new(super::NodeKey::new(""), orderstamp::past(), "").into()
}
