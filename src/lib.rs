//! RichSync Core - Richtext sync engine
//!
//! This is the Rust core of RichSync, compiled to both native and WASM.
//! It implements:
//! - Order stamps for conflict-free sibling ordering
//! - A keyed richtext tree with normalization
//! - Diff/patch with changes that commute across replicas
//! - Ref-marker lifecycle with expiring pointers
//! - A value encoder with tagged JSON, cyclic references and checksums
//! - A shadow-copy sync session
//!
//! # Examples
//!
//! ```rust
//! use richsync_core::richtext::{diff, patch, Change, Document, NodeKey};
//! use richsync_core::value::ChecksumOptions;
//!
//! let base = Document::new();
//! let ours = patch(
//!     &base,
//!     &[Change::InsertText { node: NodeKey::new("root/p/text"), offset: 0, text: "Hello".into() }],
//!     false,
//! )
//! .unwrap();
//!
//! let theirs = patch(&base, &diff(&base, &ours, false), false).unwrap();
//! let opts = ChecksumOptions::default();
//! assert_eq!(ours.checksum(&opts).unwrap(), theirs.checksum(&opts).unwrap());
//! ```

pub mod config;
pub mod error;
pub mod orderstamp;
pub mod richtext;
pub mod session;
pub mod value;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-exports for convenience
pub use config::EngineConfig;
pub use error::{ConfigError, DecodeError, EncodeError, PatchError, Result, StampError, SyncError};
pub use orderstamp::{OrderStamp, StampGenerator};
pub use richtext::{Change, ChangeBatch, Document};
pub use session::{Convergence, SyncSession};
