//! Error types for the sync engine
//!
//! Each subsystem has its own error enum; [`SyncError`] aggregates them so
//! callers that drive the whole pipeline (diff → encode → transport →
//! decode → patch) can use a single `Result` type.
//!
//! Benign staleness (a change whose target node is already gone) is *not*
//! an error anywhere in this crate. Such changes are skipped.

use crate::richtext::NodeKey;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, SyncError>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum SyncError {
    /// Value could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Encoded value could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A change batch could not be applied
    #[error("patch error: {0}")]
    Patch(#[from] PatchError),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// No order stamp could be generated
    #[error("stamp error: {0}")]
    Stamp(#[from] StampError),

    /// JSON (de)serialization failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised when asking for a stamp between two others
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StampError {
    /// Both operands are the same stamp
    #[error("no stamp exists between {0:?} and itself")]
    Equal(String),

    /// The larger operand is the smaller one followed only by the lowest
    /// alphabet character
    #[error("no stamp exists between {lo:?} and {hi:?}")]
    NoRoom { lo: String, hi: String },
}

/// Errors raised while converting a value to its encoded form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The value has no representation in the target format
    #[error("unsupported value: {0}")]
    Unsupported(String),

    /// A plain encoder reached the same shared value while still inside it
    #[error("cycle detected; use the cyclic encoder for self-referencing values")]
    Cycle,

    /// A custom-serializable value failed to serialize itself
    #[error("custom value failed to serialize: {0}")]
    Custom(String),
}

/// Errors raised while decoding an encoded value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A `{__rId}` token appeared outside of a reference envelope
    #[error("reference token {0} outside of a reference envelope")]
    DanglingRef(u64),

    /// A `{__rId}` token pointed past the end of the reference table
    #[error("reference token {id} out of range (table has {len} entries)")]
    RefOutOfRange { id: u64, len: usize },

    /// The input did not have the expected shape
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Errors raised by `patch` for changes that can never be valid
///
/// These indicate a protocol bug upstream and are never silently repaired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The change expects a different node kind than the one found
    #[error("node {key} is a {found}, but {op} expects a {expected}")]
    KindMismatch {
        key: NodeKey,
        op: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// A text offset or range exceeds the target's length
    #[error("range {start}..{end} out of bounds for node {key} (length: {length})")]
    OffsetOutOfBounds {
        key: NodeKey,
        start: usize,
        end: usize,
        length: usize,
    },

    /// The root element can't be removed or inserted
    #[error("the root element can't be the target of {0}")]
    RootTarget(&'static str),
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field has a value outside its allowed range
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The configuration source could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}
