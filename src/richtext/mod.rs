//! Richtext documents and their synchronization
//!
//! This module holds the document tree and the operations that move edits
//! between replicas:
//!
//! - **Tree:** keyed nodes with order stamps, plus ref-marker pointers
//! - **Normalize:** canonical form for presentation and checksums
//! - **Diff / Patch:** key-addressed changes that commute across replicas
//! - **Refs:** ref-marker collection, rewriting and expiry GC
//! - **Codec:** the document as a [`CoreValue`](crate::value::CoreValue)
//!
//! # Example
//!
//! ```rust
//! use richsync_core::richtext::{diff, normalize, patch, Change, Document, NodeKey};
//!
//! let base = Document::new();
//! let edited = patch(
//!     &base,
//!     &[Change::InsertText { node: NodeKey::new("root/p/text"), offset: 0, text: "hi".into() }],
//!     false,
//! )
//! .unwrap();
//!
//! let changes = diff(&base, &edited, false);
//! let replayed = normalize(&patch(&base, &changes, false).unwrap());
//! assert_eq!(replayed.plaintext(), "hi");
//! ```

pub mod change;
pub mod codec;
pub mod diff;
pub mod normalize;
pub mod patch;
pub mod refs;
pub mod tree;

pub use change::{Change, ChangeBatch};
pub use diff::diff;
pub use normalize::{is_normalized, normalize};
pub use patch::patch;
pub use refs::{fill_refs, rewrite_refs};
pub use tree::{init_root, Document, ElementNode, Mark, Marks, NodeKey, Pointer, RefMarker, RefType, TextNode, TreeNode};
