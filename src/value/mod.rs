//! The value universe shared by every encoder
//!
//! [`CoreValue`] is the closed set of value shapes the engine knows how to
//! encode, hash and transmit. Encoders are visitors over this type (see
//! [`ValueEncoder`]); adding a variant is a compile-time-checked change to
//! every encoder.
//!
//! Sharing is explicit: a [`SharedValue`] is a reference-counted cell that
//! can be reachable from several places, including from inside itself. The
//! plain JSON encoder rejects cycles, the cyclic codec ([`cyclic`]) turns
//! them into reference tokens, and the checksum engine hashes them as
//! back-references.
//!
//! # Example
//!
//! ```rust
//! use richsync_core::value::{CoreValue, checksum, ChecksumOptions};
//!
//! let a = CoreValue::object([("x", CoreValue::from(1.0)), ("y", CoreValue::from("two"))]);
//! let b = CoreValue::object([("y", CoreValue::from("two")), ("x", CoreValue::from(1.0))]);
//!
//! let opts = ChecksumOptions::default();
//! assert_eq!(checksum(&a, &opts).unwrap(), checksum(&b, &opts).unwrap());
//! ```

pub mod checksum;
pub mod cyclic;
pub mod encoder;
pub mod json;

pub use checksum::{checksum, ChecksumEncoder, ChecksumOptions, Digest};
pub use cyclic::{decode_cyclic, encode_cyclic};
pub use encoder::{EncodeOptions, Encodable, FieldSink, ValueEncoder};
pub use json::{JsonDecoder, JsonEncoder};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Every value the encoders understand
#[derive(Clone)]
pub enum CoreValue {
    /// Absent value; omitted from objects, `null` inside sequences
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    /// Ordered sequence
    Array(Vec<CoreValue>),
    /// Unordered collection; element order carries no meaning
    Set(Vec<CoreValue>),
    /// Plain keyed object
    Object(IndexMap<String, CoreValue>),
    /// Associative container with non-string keys allowed
    Dictionary(IndexMap<CoreKey, CoreValue>),
    /// Lazily produced sequence, materialized on encode
    Generator(LazySeq),
    /// A value that serializes itself field by field
    Encodable(Arc<dyn Encodable>),
    /// A cell that may be reachable from more than one place
    Shared(SharedValue),
}

/// Key of a [`CoreValue::Dictionary`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoreKey {
    String(String),
    Number(i64),
}

impl fmt::Display for CoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreKey::String(s) => f.write_str(s),
            CoreKey::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Type tag of a [`CoreValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreType {
    Undefined,
    Null,
    Bool,
    Number,
    String,
    Date,
    Array,
    Set,
    Object,
    Dictionary,
    Generator,
    Encodable,
    Shared,
}

impl CoreType {
    /// Short code used to prefix type-safe checksum tokens
    pub fn code(self) -> &'static str {
        match self {
            CoreType::Undefined => "u",
            CoreType::Null => "n",
            CoreType::Bool => "b",
            CoreType::Number => "f",
            CoreType::String => "s",
            CoreType::Date => "D",
            CoreType::Array => "a",
            CoreType::Set => "S",
            CoreType::Object => "o",
            CoreType::Dictionary => "m",
            CoreType::Generator => "a",
            CoreType::Encodable => "E",
            CoreType::Shared => "r",
        }
    }
}

impl CoreValue {
    /// Type tag of this value
    pub fn core_type(&self) -> CoreType {
        match self {
            CoreValue::Undefined => CoreType::Undefined,
            CoreValue::Null => CoreType::Null,
            CoreValue::Bool(_) => CoreType::Bool,
            CoreValue::Number(_) => CoreType::Number,
            CoreValue::String(_) => CoreType::String,
            CoreValue::Date(_) => CoreType::Date,
            CoreValue::Array(_) => CoreType::Array,
            CoreValue::Set(_) => CoreType::Set,
            CoreValue::Object(_) => CoreType::Object,
            CoreValue::Dictionary(_) => CoreType::Dictionary,
            CoreValue::Generator(_) => CoreType::Generator,
            CoreValue::Encodable(_) => CoreType::Encodable,
            CoreValue::Shared(_) => CoreType::Shared,
        }
    }

    /// Build an object from key/value pairs, keeping their order
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, CoreValue)>) -> Self {
        CoreValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wrap a value in a new shared cell
    pub fn shared(value: CoreValue) -> Self {
        CoreValue::Shared(SharedValue::new(value))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, CoreValue::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CoreValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CoreValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CoreValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, CoreValue>> {
        match self {
            CoreValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Elements of an array or a set
    pub fn as_items(&self) -> Option<&[CoreValue]> {
        match self {
            CoreValue::Array(items) | CoreValue::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Field of an object, [`CoreValue::Undefined`] when missing
    pub fn get(&self, key: &str) -> &CoreValue {
        static UNDEFINED: CoreValue = CoreValue::Undefined;
        self.as_object()
            .and_then(|map| map.get(key))
            .unwrap_or(&UNDEFINED)
    }

    /// True for objects carrying `isLocal: true`, looking through shared cells
    pub fn is_local(&self) -> bool {
        match self {
            CoreValue::Object(map) => matches!(map.get("isLocal"), Some(CoreValue::Bool(true))),
            CoreValue::Shared(cell) => cell.read().is_local(),
            _ => false,
        }
    }

    /// Convert a plain JSON value without interpreting any tags
    pub fn from_plain_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CoreValue::Null,
            serde_json::Value::Bool(b) => CoreValue::Bool(*b),
            serde_json::Value::Number(n) => CoreValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => CoreValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                CoreValue::Array(items.iter().map(CoreValue::from_plain_json).collect())
            }
            serde_json::Value::Object(map) => CoreValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), CoreValue::from_plain_json(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for CoreValue {
    /// Structural equality
    ///
    /// Shared cells compare equal when they are the same cell or hold equal
    /// values. Comparing two distinct cyclic graphs this way does not
    /// terminate; compare those by checksum instead.
    fn eq(&self, other: &Self) -> bool {
        use CoreValue::*;
        match (self, other) {
            (Undefined, Undefined) | (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Array(a), Array(b)) | (Set(a), Set(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Dictionary(a), Dictionary(b)) => a == b,
            (Generator(a), Generator(b)) => a.iter().eq(b.iter()),
            (Encodable(a), Encodable(b)) => Arc::ptr_eq(a, b),
            (Shared(a), Shared(b)) => a.ptr_eq(b) || *a.read() == *b.read(),
            _ => false,
        }
    }
}

impl fmt::Debug for CoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreValue::Undefined => f.write_str("Undefined"),
            CoreValue::Null => f.write_str("Null"),
            CoreValue::Bool(b) => write!(f, "Bool({})", b),
            CoreValue::Number(n) => write!(f, "Number({})", n),
            CoreValue::String(s) => write!(f, "String({:?})", s),
            CoreValue::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            CoreValue::Array(items) => f.debug_tuple("Array").field(items).finish(),
            CoreValue::Set(items) => f.debug_tuple("Set").field(items).finish(),
            CoreValue::Object(map) => f.debug_tuple("Object").field(map).finish(),
            CoreValue::Dictionary(map) => f.debug_tuple("Dictionary").field(map).finish(),
            CoreValue::Generator(_) => f.write_str("Generator(..)"),
            CoreValue::Encodable(obj) => f.debug_tuple("Encodable").field(obj).finish(),
            CoreValue::Shared(cell) => cell.fmt(f),
        }
    }
}

impl From<bool> for CoreValue {
    fn from(b: bool) -> Self {
        CoreValue::Bool(b)
    }
}

impl From<f64> for CoreValue {
    fn from(n: f64) -> Self {
        CoreValue::Number(n)
    }
}

impl From<&str> for CoreValue {
    fn from(s: &str) -> Self {
        CoreValue::String(s.to_string())
    }
}

impl From<String> for CoreValue {
    fn from(s: String) -> Self {
        CoreValue::String(s)
    }
}

impl From<DateTime<Utc>> for CoreValue {
    fn from(d: DateTime<Utc>) -> Self {
        CoreValue::Date(d)
    }
}

impl From<Vec<CoreValue>> for CoreValue {
    fn from(items: Vec<CoreValue>) -> Self {
        CoreValue::Array(items)
    }
}

type SeqFactory = dyn Fn() -> Box<dyn Iterator<Item = CoreValue>> + Send + Sync;

/// A restartable lazy sequence
///
/// Each call to [`LazySeq::iter`] starts a fresh pass, so the same
/// sequence can be encoded, hashed and compared independently.
#[derive(Clone)]
pub struct LazySeq(Arc<SeqFactory>);

impl LazySeq {
    pub fn new<F, I>(factory: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Iterator<Item = CoreValue> + 'static,
    {
        LazySeq(Arc::new(move || Box::new(factory())))
    }

    /// Start a new pass over the sequence
    pub fn iter(&self) -> Box<dyn Iterator<Item = CoreValue>> {
        (self.0)()
    }
}

/// A reference-counted value cell with identity
///
/// Two clones of the same `SharedValue` refer to the same cell; encoders
/// use the cell address ([`SharedValue::id`]) to detect fan-in and cycles.
#[derive(Clone, Default)]
pub struct SharedValue(Arc<RwLock<CoreValue>>);

impl Default for CoreValue {
    fn default() -> Self {
        CoreValue::Undefined
    }
}

impl SharedValue {
    pub fn new(value: CoreValue) -> Self {
        SharedValue(Arc::new(RwLock::new(value)))
    }

    /// Identity of the cell, stable for its lifetime
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &SharedValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Read the cell's value
    ///
    /// A poisoned lock still yields its value; cells hold plain data.
    pub fn read(&self) -> RwLockReadGuard<'_, CoreValue> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the cell's value
    pub fn set(&self, value: CoreValue) {
        *self.write() = value;
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, CoreValue> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for SharedValue {
    // The cell may contain itself, so never print its contents.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared(@{:x})", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_type() {
        assert_eq!(CoreValue::Null.core_type(), CoreType::Null);
        assert_eq!(CoreValue::from("x").core_type(), CoreType::String);
        assert_eq!(CoreValue::Set(vec![]).core_type().code(), "S");
    }

    #[test]
    fn test_get_missing_is_undefined() {
        let obj = CoreValue::object([("a", CoreValue::from(1.0))]);
        assert_eq!(obj.get("a").as_f64(), Some(1.0));
        assert!(obj.get("b").is_undefined());
        assert!(CoreValue::Null.get("a").is_undefined());
    }

    #[test]
    fn test_is_local_through_shared() {
        let local = CoreValue::object([("isLocal", CoreValue::from(true))]);
        assert!(local.is_local());
        assert!(CoreValue::shared(local).is_local());
        assert!(!CoreValue::object([("isLocal", CoreValue::from(false))]).is_local());
    }

    #[test]
    fn test_shared_identity() {
        let cell = SharedValue::new(CoreValue::from(1.0));
        let alias = cell.clone();
        assert!(cell.ptr_eq(&alias));
        assert_eq!(cell.id(), alias.id());

        alias.set(CoreValue::from(2.0));
        assert_eq!(cell.read().as_f64(), Some(2.0));

        let other = SharedValue::new(CoreValue::from(2.0));
        assert!(!cell.ptr_eq(&other));
        assert_eq!(CoreValue::Shared(cell), CoreValue::Shared(other));
    }

    #[test]
    fn test_debug_does_not_recurse_into_cycles() {
        let cell = SharedValue::new(CoreValue::Null);
        cell.set(CoreValue::Array(vec![CoreValue::Shared(cell.clone())]));
        let printed = format!("{:?}", CoreValue::Shared(cell));
        assert!(printed.starts_with("Shared(@"));
    }

    #[test]
    fn test_lazy_seq_restarts() {
        let seq = LazySeq::new(|| (0..3).map(|i| CoreValue::from(i as f64)));
        assert_eq!(seq.iter().count(), 3);
        assert_eq!(seq.iter().count(), 3);
        assert_eq!(CoreValue::Generator(seq.clone()), CoreValue::Generator(seq));
    }

    #[test]
    fn test_from_plain_json() {
        let json = serde_json::json!({"a": [1, "x", null], "b": true});
        let value = CoreValue::from_plain_json(&json);
        assert_eq!(value.get("b").as_bool(), Some(true));
        assert_eq!(value.get("a").as_items().map(|i| i.len()), Some(3));
    }
}
