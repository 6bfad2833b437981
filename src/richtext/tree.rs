//! Richtext tree model
//!
//! A document is a tree of [`TreeNode`]s under a root [`ElementNode`].
//! Every node carries a stable [`NodeKey`] and an [`OrderStamp`]; siblings
//! are kept sorted by `(order, key)`. Changes address nodes by key, never by
//! index, which is what lets concurrent edits to unrelated nodes commute.
//!
//! # Example
//!
//! ```rust
//! use richsync_core::richtext::{Document, NodeKey, TextNode};
//! use richsync_core::orderstamp;
//!
//! let mut doc = Document::new();
//! assert_eq!(doc.plaintext(), "");
//!
//! let para = doc.root.children[0].as_element_mut().unwrap();
//! para.insert_child(TextNode::new(NodeKey::new("t1"), orderstamp::present(), "hello").into());
//! assert_eq!(doc.plaintext(), "hello");
//! ```

use crate::orderstamp::{self, OrderStamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of a node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// A fresh random key
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Key of the document root
    pub fn root() -> Self {
        Self("root".to_string())
    }

    /// Deterministic key for a node derived from this one
    ///
    /// Two replicas deriving a node from the same parent get the same key.
    pub fn derive(&self, suffix: &str) -> Self {
        Self(format!("{}/{}", self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single formatting mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Bold,
    Italic,
    Underline,
    Strike,
}

impl Mark {
    pub const ALL: [Mark; 4] = [Mark::Bold, Mark::Italic, Mark::Underline, Mark::Strike];

    pub fn as_str(self) -> &'static str {
        match self {
            Mark::Bold => "bold",
            Mark::Italic => "italic",
            Mark::Underline => "underline",
            Mark::Strike => "strike",
        }
    }
}

/// Formatting applied to a text run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Marks {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
}

impl Marks {
    pub fn has(&self, mark: Mark) -> bool {
        match mark {
            Mark::Bold => self.bold,
            Mark::Italic => self.italic,
            Mark::Underline => self.underline,
            Mark::Strike => self.strike,
        }
    }

    pub fn set(&mut self, mark: Mark, on: bool) {
        match mark {
            Mark::Bold => self.bold = on,
            Mark::Italic => self.italic = on,
            Mark::Underline => self.underline = on,
            Mark::Strike => self.strike = on,
        }
    }

    pub fn with(mut self, mark: Mark) -> Self {
        self.set(mark, true);
        self
    }

    /// Marks that are switched on
    pub fn active(&self) -> impl Iterator<Item = Mark> + '_ {
        Mark::ALL.into_iter().filter(move |m| self.has(*m))
    }
}

/// Kind of a [`RefMarker`]'s target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RefType {
    #[serde(rename = "link")]
    Link,
    #[serde(rename = "inter-doc")]
    InternalDoc,
}

impl RefType {
    pub fn as_str(self) -> &'static str {
        match self {
            RefType::Link => "link",
            RefType::InternalDoc => "inter-doc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "link" => Some(RefType::Link),
            "inter-doc" => Some(RefType::InternalDoc),
            _ => None,
        }
    }
}

/// A run of text with uniform formatting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub key: NodeKey,
    pub order: OrderStamp,
    pub text: String,
    #[serde(default)]
    pub marks: Marks,
    #[serde(default)]
    pub is_local: bool,
}

impl TextNode {
    pub fn new(key: NodeKey, order: OrderStamp, text: impl Into<String>) -> Self {
        Self {
            key,
            order,
            text: text.into(),
            marks: Marks::default(),
            is_local: false,
        }
    }

    pub fn with_marks(mut self, marks: Marks) -> Self {
        self.marks = marks;
        self
    }

    pub fn local(mut self) -> Self {
        self.is_local = true;
        self
    }
}

/// A container node
///
/// An untagged element is a generic container; the root is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub key: NodeKey,
    pub order: OrderStamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub children: Vec<TreeNode>,
    #[serde(default)]
    pub is_local: bool,
}

impl ElementNode {
    pub fn new(key: NodeKey, order: OrderStamp, tag: Option<&str>) -> Self {
        Self {
            key,
            order,
            tag: tag.map(str::to_string),
            attrs: BTreeMap::new(),
            children: Vec::new(),
            is_local: false,
        }
    }

    /// Tagged element
    pub fn tagged(key: NodeKey, order: OrderStamp, tag: &str) -> Self {
        Self::new(key, order, Some(tag))
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = TreeNode>) -> Self {
        for child in children {
            self.insert_child(child);
        }
        self
    }

    pub fn local(mut self) -> Self {
        self.is_local = true;
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Insert a child at its sorted position
    pub fn insert_child(&mut self, child: TreeNode) {
        let idx = self
            .children
            .partition_point(|c| (c.order(), c.key()) < (child.order(), child.key()));
        self.children.insert(idx, child);
    }

    /// Index of the direct child with the given key
    pub fn child_index(&self, key: &NodeKey) -> Option<usize> {
        self.children.iter().position(|c| c.key() == key)
    }

    /// Restore the `(order, key)` sibling order
    pub fn sort_children(&mut self) {
        self.children
            .sort_by(|a, b| (a.order(), a.key()).cmp(&(b.order(), b.key())));
    }

    /// Find an element in this subtree, including `self`
    pub fn find_element(&self, key: &NodeKey) -> Option<&ElementNode> {
        if &self.key == key {
            return Some(self);
        }
        self.children.iter().find_map(|c| match c {
            TreeNode::Element(e) => e.find_element(key),
            _ => None,
        })
    }

    pub fn find_element_mut(&mut self, key: &NodeKey) -> Option<&mut ElementNode> {
        if &self.key == key {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| match c {
            TreeNode::Element(e) => e.find_element_mut(key),
            _ => None,
        })
    }

    /// Find a descendant node
    pub fn find(&self, key: &NodeKey) -> Option<&TreeNode> {
        for child in &self.children {
            if child.key() == key {
                return Some(child);
            }
            if let TreeNode::Element(e) = child {
                if let Some(found) = e.find(key) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn find_mut(&mut self, key: &NodeKey) -> Option<&mut TreeNode> {
        for child in self.children.iter_mut() {
            if child.key() == key {
                return Some(child);
            }
            if let TreeNode::Element(e) = child {
                if let Some(found) = e.find_mut(key) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Detach a descendant node, returning it
    pub fn remove(&mut self, key: &NodeKey) -> Option<TreeNode> {
        if let Some(idx) = self.child_index(key) {
            return Some(self.children.remove(idx));
        }
        self.children.iter_mut().find_map(|c| match c {
            TreeNode::Element(e) => e.remove(key),
            _ => None,
        })
    }

    /// True when the subtree has no text, refs or void elements
    pub fn is_blank(&self) -> bool {
        self.children.iter().all(|c| match c {
            TreeNode::Text(t) => t.text.is_empty(),
            TreeNode::Element(e) => e.is_blank(),
            TreeNode::Ref(_) => false,
        })
    }

    /// Copy of this subtree without replica-local nodes
    pub fn without_local(&self) -> ElementNode {
        let mut copy = ElementNode {
            children: Vec::with_capacity(self.children.len()),
            ..self.clone_shallow()
        };
        for child in self.children.iter().filter(|c| !c.is_local()) {
            copy.children.push(child.without_local());
        }
        copy
    }

    /// Copy of this node with no children
    pub fn clone_shallow(&self) -> ElementNode {
        ElementNode {
            key: self.key.clone(),
            order: self.order.clone(),
            tag: self.tag.clone(),
            attrs: self.attrs.clone(),
            children: Vec::new(),
            is_local: self.is_local,
        }
    }
}

/// A weak, by-key reference to another document or resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefMarker {
    pub key: NodeKey,
    pub order: OrderStamp,
    #[serde(rename = "ref")]
    pub ref_key: String,
    #[serde(rename = "type")]
    pub ref_type: RefType,
    #[serde(default)]
    pub is_local: bool,
}

impl RefMarker {
    pub fn new(key: NodeKey, order: OrderStamp, ref_key: impl Into<String>, ref_type: RefType) -> Self {
        Self {
            key,
            order,
            ref_key: ref_key.into(),
            ref_type,
            is_local: false,
        }
    }
}

/// Any node of the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TreeNode {
    Element(ElementNode),
    Text(TextNode),
    Ref(RefMarker),
}

impl TreeNode {
    pub fn key(&self) -> &NodeKey {
        match self {
            TreeNode::Element(e) => &e.key,
            TreeNode::Text(t) => &t.key,
            TreeNode::Ref(r) => &r.key,
        }
    }

    pub fn order(&self) -> &OrderStamp {
        match self {
            TreeNode::Element(e) => &e.order,
            TreeNode::Text(t) => &t.order,
            TreeNode::Ref(r) => &r.order,
        }
    }

    pub fn set_order(&mut self, order: OrderStamp) {
        match self {
            TreeNode::Element(e) => e.order = order,
            TreeNode::Text(t) => t.order = order,
            TreeNode::Ref(r) => r.order = order,
        }
    }

    pub fn is_local(&self) -> bool {
        match self {
            TreeNode::Element(e) => e.is_local,
            TreeNode::Text(t) => t.is_local,
            TreeNode::Ref(r) => r.is_local,
        }
    }

    /// Name of the variant, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            TreeNode::Element(_) => "element",
            TreeNode::Text(_) => "text",
            TreeNode::Ref(_) => "ref",
        }
    }

    /// Tag of an element node
    pub fn tag(&self) -> Option<&str> {
        match self {
            TreeNode::Element(e) => e.tag(),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            TreeNode::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementNode> {
        match self {
            TreeNode::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextNode> {
        match self {
            TreeNode::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Copy of this subtree without replica-local descendants
    pub fn without_local(&self) -> TreeNode {
        match self {
            TreeNode::Element(e) => TreeNode::Element(e.without_local()),
            other => other.clone(),
        }
    }
}

impl From<ElementNode> for TreeNode {
    fn from(e: ElementNode) -> Self {
        TreeNode::Element(e)
    }
}

impl From<TextNode> for TreeNode {
    fn from(t: TextNode) -> Self {
        TreeNode::Text(t)
    }
}

impl From<RefMarker> for TreeNode {
    fn from(r: RefMarker) -> Self {
        TreeNode::Ref(r)
    }
}

/// Expiry bookkeeping for one [`RefMarker`]
///
/// A pointer without an expiration is live. Once the referenced target is
/// tombstoned the pointer gets an expiration, and after the grace window
/// the marker becomes eligible for garbage collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pointer {
    #[serde(rename = "ref")]
    pub ref_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

/// A richtext document: a root element plus ref-marker bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub root: ElementNode,
    /// Pointers keyed by the marker node they track
    #[serde(default)]
    pub pointers: BTreeMap<NodeKey, Pointer>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// A document holding one empty paragraph
    pub fn new() -> Self {
        Self::from_root(init_root())
    }

    pub fn from_root(root: ElementNode) -> Self {
        Self {
            root,
            pointers: BTreeMap::new(),
        }
    }

    /// Find a non-root node
    pub fn find(&self, key: &NodeKey) -> Option<&TreeNode> {
        self.root.find(key)
    }

    /// Find an element, including the root
    pub fn find_element(&self, key: &NodeKey) -> Option<&ElementNode> {
        self.root.find_element(key)
    }

    /// True when the key names the root or any node below it
    pub fn contains(&self, key: &NodeKey) -> bool {
        &self.root.key == key || self.find(key).is_some()
    }

    /// Depth-first, pre-order traversal of every node below the root
    pub fn dfs(&self) -> Dfs<'_> {
        Dfs::new(&self.root)
    }

    /// Text content with one line per block
    pub fn plaintext(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        collect_lines(&self.root, &mut lines);
        lines.join("\n")
    }

    /// Ref markers outside replica-local content, in document order
    pub fn non_local_markers(&self) -> Vec<&RefMarker> {
        fn walk<'a>(element: &'a ElementNode, out: &mut Vec<&'a RefMarker>) {
            for child in element.children.iter().filter(|c| !c.is_local()) {
                match child {
                    TreeNode::Ref(marker) => out.push(marker),
                    TreeNode::Element(inner) => walk(inner, out),
                    TreeNode::Text(_) => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    /// Register a pointer for a ref marker
    pub fn track_ref(&mut self, marker: &RefMarker) {
        self.pointers
            .entry(marker.key.clone())
            .or_insert_with(|| Pointer {
                ref_key: marker.ref_key.clone(),
                expiration: None,
            });
    }
}

/// Root of an empty document: one paragraph holding one empty text run
///
/// Keys and stamps are fixed, so replicas that initialize independently
/// agree on the initial tree.
pub fn init_root() -> ElementNode {
    let root_key = NodeKey::root();
    let para_key = root_key.derive("p");
    let text = TextNode::new(para_key.derive("text"), orderstamp::past(), "");
    let para = ElementNode::tagged(para_key, orderstamp::past(), "p").with_children([text.into()]);
    ElementNode::new(root_key, orderstamp::past(), None).with_children([para.into()])
}

fn collect_lines(element: &ElementNode, lines: &mut Vec<String>) {
    for child in &element.children {
        match child {
            TreeNode::Element(e) if !is_inline(e) => {
                if e.children.iter().any(|c| matches!(c, TreeNode::Element(inner) if !is_inline(inner))) {
                    collect_lines(e, lines);
                } else {
                    let mut line = String::new();
                    collect_inline(e, &mut line);
                    lines.push(line);
                }
            }
            other => {
                let mut line = String::new();
                collect_inline_node(other, &mut line);
                lines.push(line);
            }
        }
    }
}

fn collect_inline(element: &ElementNode, out: &mut String) {
    for child in &element.children {
        collect_inline_node(child, out);
    }
}

fn collect_inline_node(node: &TreeNode, out: &mut String) {
    match node {
        TreeNode::Text(t) => out.push_str(&t.text),
        TreeNode::Element(e) => collect_inline(e, out),
        TreeNode::Ref(_) => {}
    }
}

fn is_inline(element: &ElementNode) -> bool {
    matches!(element.tag(), Some("span") | Some("a") | Some("mention"))
}

/// Pre-order iterator yielding `(node, depth, parent)`
///
/// Direct children of the root have depth 1.
pub struct Dfs<'a> {
    stack: Vec<(&'a ElementNode, usize, usize)>,
}

impl<'a> Dfs<'a> {
    fn new(root: &'a ElementNode) -> Self {
        Self {
            stack: vec![(root, 0, 1)],
        }
    }
}

impl<'a> Iterator for Dfs<'a> {
    type Item = (&'a TreeNode, usize, &'a ElementNode);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (parent, idx, depth) = self.stack.last_mut()?;
            let parent: &'a ElementNode = *parent;
            let depth = *depth;
            if *idx >= parent.children.len() {
                self.stack.pop();
                continue;
            }
            let node = &parent.children[*idx];
            *idx += 1;
            if let TreeNode::Element(e) = node {
                self.stack.push((e, 0, depth + 1));
            }
            return Some((node, depth, parent));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(key: &str, order: &str, s: &str) -> TreeNode {
        TextNode::new(NodeKey::new(key), OrderStamp::from(order), s).into()
    }

    fn para(key: &str, order: &str, children: Vec<TreeNode>) -> TreeNode {
        ElementNode::tagged(NodeKey::new(key), OrderStamp::from(order), "p")
            .with_children(children)
            .into()
    }

    fn doc(children: Vec<TreeNode>) -> Document {
        Document::from_root(
            ElementNode::new(NodeKey::root(), orderstamp::past(), None).with_children(children),
        )
    }

    #[test]
    fn test_init_root_shape() {
        let doc = Document::new();
        assert_eq!(doc.root.children.len(), 1);
        let p = doc.root.children[0].as_element().unwrap();
        assert_eq!(p.tag(), Some("p"));
        assert_eq!(p.key.as_str(), "root/p");
        assert_eq!(p.children[0].key().as_str(), "root/p/text");
        assert_eq!(Document::new(), Document::new());
    }

    #[test]
    fn test_children_sorted_on_insert() {
        let mut p = ElementNode::tagged(NodeKey::new("p"), OrderStamp::from("a"), "p");
        p.insert_child(text("t2", "b", "2"));
        p.insert_child(text("t1", "a", "1"));
        p.insert_child(text("t0", "b", "0"));
        let keys: Vec<_> = p.children.iter().map(|c| c.key().as_str()).collect();
        assert_eq!(keys, vec!["t1", "t0", "t2"]);
    }

    #[test]
    fn test_find_and_remove() {
        let mut d = doc(vec![para("p1", "a", vec![text("t1", "a", "x")])]);
        assert!(d.contains(&NodeKey::root()));
        assert_eq!(d.find(&NodeKey::new("t1")).unwrap().kind(), "text");
        assert!(d.find_element(&NodeKey::new("p1")).is_some());

        let removed = d.root.remove(&NodeKey::new("t1")).unwrap();
        assert_eq!(removed.key().as_str(), "t1");
        assert!(!d.contains(&NodeKey::new("t1")));
    }

    #[test]
    fn test_plaintext() {
        let d = doc(vec![
            para("p1", "a", vec![text("t1", "a", "hello "), text("t2", "b", "there")]),
            para("p2", "b", vec![text("t3", "a", "world")]),
        ]);
        assert_eq!(d.plaintext(), "hello there\nworld");
    }

    #[test]
    fn test_dfs_depth_and_parent() {
        let d = doc(vec![para("p1", "a", vec![text("t1", "a", "x")])]);
        let visited: Vec<_> = d
            .dfs()
            .map(|(node, depth, parent)| (node.key().as_str(), depth, parent.key.as_str()))
            .collect();
        assert_eq!(visited, vec![("p1", 1, "root"), ("t1", 2, "p1")]);
    }

    #[test]
    fn test_without_local() {
        let p = ElementNode::tagged(NodeKey::new("p"), OrderStamp::from("a"), "p").with_children([
            text("t1", "a", "keep"),
            TextNode::new(NodeKey::new("t2"), OrderStamp::from("b"), "cursor")
                .local()
                .into(),
        ]);
        let stripped = p.without_local();
        assert_eq!(stripped.children.len(), 1);
        assert_eq!(stripped.children[0].key().as_str(), "t1");
    }

    #[test]
    fn test_serde_shape() {
        let node: TreeNode = RefMarker::new(
            NodeKey::new("r1"),
            OrderStamp::from("a"),
            "doc-42",
            RefType::InternalDoc,
        )
        .into();
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "ref");
        assert_eq!(json["ref"], "doc-42");
        assert_eq!(json["type"], "inter-doc");
        let back: TreeNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_marks() {
        let marks = Marks::default().with(Mark::Bold).with(Mark::Strike);
        assert!(marks.has(Mark::Bold));
        assert!(!marks.has(Mark::Italic));
        assert_eq!(marks.active().collect::<Vec<_>>(), vec![Mark::Bold, Mark::Strike]);
    }
}
