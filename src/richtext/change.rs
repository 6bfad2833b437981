//! Atomic, key-addressed edits
//!
//! A [`Change`] names its target by [`NodeKey`] and, for text edits, a
//! grapheme offset local to that node. Nothing refers to a child index, so
//! two change sets diffed from the same ancestor can each be replayed on a
//! tree that already contains the other.

use super::tree::{ElementNode, Mark, NodeKey, RefMarker, TreeNode};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One edit operation
///
/// Offsets and lengths count extended grapheme clusters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Change {
    /// Insert `text` into a text node at `offset`
    InsertText {
        node: NodeKey,
        offset: usize,
        text: String,
    },

    /// Delete `len` graphemes from a text node starting at `offset`
    DeleteText {
        node: NodeKey,
        offset: usize,
        len: usize,
    },

    /// Insert a subtree under `parent` at its `(order, key)` position
    InsertNode { parent: NodeKey, node: TreeNode },

    /// Remove a node and its subtree
    RemoveNode { node: NodeKey },

    /// Switch a mark on for a text node
    SetMark { node: NodeKey, mark: Mark },

    /// Switch a mark off for a text node
    ClearMark { node: NodeKey, mark: Mark },

    /// Insert a ref marker under `parent`
    InsertRef { parent: NodeKey, marker: RefMarker },

    /// Remove a ref marker
    RemoveRef { node: NodeKey },

    /// Change an element's tag
    SetTag {
        node: NodeKey,
        tag: Option<String>,
    },

    /// Set (`Some`) or remove (`None`) an element attribute
    SetAttr {
        node: NodeKey,
        name: String,
        value: Option<serde_json::Value>,
    },
}

impl Change {
    /// Key of the node this change targets (the parent, for inserts)
    pub fn target(&self) -> &NodeKey {
        match self {
            Change::InsertText { node, .. }
            | Change::DeleteText { node, .. }
            | Change::RemoveNode { node }
            | Change::SetMark { node, .. }
            | Change::ClearMark { node, .. }
            | Change::RemoveRef { node }
            | Change::SetTag { node, .. }
            | Change::SetAttr { node, .. } => node,
            Change::InsertNode { parent, .. } | Change::InsertRef { parent, .. } => parent,
        }
    }

    /// Operation name, for diagnostics
    pub fn op(&self) -> &'static str {
        match self {
            Change::InsertText { .. } => "insertText",
            Change::DeleteText { .. } => "deleteText",
            Change::InsertNode { .. } => "insertNode",
            Change::RemoveNode { .. } => "removeNode",
            Change::SetMark { .. } => "setMark",
            Change::ClearMark { .. } => "clearMark",
            Change::InsertRef { .. } => "insertRef",
            Change::RemoveRef { .. } => "removeRef",
            Change::SetTag { .. } => "setTag",
            Change::SetAttr { .. } => "setAttr",
        }
    }

    /// Insert change for a subtree, choosing the ref variant for markers
    pub fn insert(parent: &ElementNode, node: TreeNode) -> Change {
        match node {
            TreeNode::Ref(marker) => Change::InsertRef {
                parent: parent.key.clone(),
                marker,
            },
            node => Change::InsertNode {
                parent: parent.key.clone(),
                node,
            },
        }
    }

    /// Remove change for a node, choosing the ref variant for markers
    pub fn remove(node: &TreeNode) -> Change {
        match node {
            TreeNode::Ref(marker) => Change::RemoveRef {
                node: marker.key.clone(),
            },
            other => Change::RemoveNode {
                node: other.key().clone(),
            },
        }
    }
}

/// The transport unit: changes produced by one local commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Revision of the sender's shadow after this batch
    pub revision: u64,
    pub changes: Vec<Change>,
}

impl ChangeBatch {
    pub fn new(revision: u64, changes: Vec<Change>) -> Self {
        Self { revision, changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Wire form of the batch
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderstamp::OrderStamp;
    use crate::richtext::tree::{RefType, TextNode};

    #[test]
    fn test_serde_tagged_by_op() {
        let change = Change::DeleteText {
            node: NodeKey::new("t1"),
            offset: 2,
            len: 3,
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["op"], "deleteText");
        assert_eq!(json["node"], "t1");
        assert_eq!(serde_json::from_value::<Change>(json).unwrap(), change);
    }

    #[test]
    fn test_batch_json_roundtrip() {
        let batch = ChangeBatch::new(
            7,
            vec![Change::SetTag {
                node: NodeKey::new("p"),
                tag: Some("h1".into()),
            }],
        );
        let json = batch.to_json().unwrap();
        assert_eq!(ChangeBatch::from_json(&json).unwrap(), batch);

        let err = ChangeBatch::from_json(r#"{"revision": "seven"}"#).unwrap_err();
        assert!(matches!(err, crate::SyncError::Json(_)));
    }

    #[test]
    fn test_target_and_op() {
        let parent = ElementNode::tagged(NodeKey::new("p"), OrderStamp::from("a"), "p");
        let text = TextNode::new(NodeKey::new("t"), OrderStamp::from("a"), "x");
        let insert = Change::insert(&parent, text.into());
        assert_eq!(insert.target().as_str(), "p");
        assert_eq!(insert.op(), "insertNode");

        let marker = RefMarker::new(NodeKey::new("r"), OrderStamp::from("b"), "doc", RefType::Link);
        assert_eq!(Change::insert(&parent, marker.clone().into()).op(), "insertRef");
        assert_eq!(Change::remove(&marker.into()).op(), "removeRef");
    }
}
