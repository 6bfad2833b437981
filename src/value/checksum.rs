//! Canonical, order-independent checksums
//!
//! The checksum streams a value through the same type dispatch as the JSON
//! encoder, feeding canonical tokens into a BLAKE3 hasher:
//!
//! - object and dictionary keys are visited in sorted order,
//! - each set element is digested on its own, the element digests are
//!   sorted, and that sorted list is hashed as the set's content,
//! - every token is length-framed, so adjacent tokens can't run together,
//! - in type-safe mode every value is prefixed with its type code, so
//!   `"1"` and `1` digest differently.
//!
//! Two replicas holding canonically equal values get the same digest no
//! matter how their keys or set elements happen to be ordered.

use super::encoder::{EncodeOptions, FieldSink, ValueEncoder, VisitStack};
use super::{CoreKey, CoreType, CoreValue, SharedValue};
use crate::error::EncodeError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex-encoded checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Wrap a hex digest received from a peer
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Digest(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Digest(hash.to_hex().to_string())
    }
}

/// Checksum settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumOptions {
    /// Prefix every value with its type code
    pub type_safe: bool,

    /// Include replica-local content
    pub local: bool,
}

impl Default for ChecksumOptions {
    fn default() -> Self {
        Self {
            type_safe: true,
            local: false,
        }
    }
}

/// Compute the canonical digest of a value
///
/// # Errors
///
/// Fails only when a custom value fails to serialize itself.
///
/// # Example
///
/// ```rust
/// use richsync_core::value::{checksum, ChecksumOptions, CoreValue};
///
/// let opts = ChecksumOptions::default();
/// let a = CoreValue::Set(vec![CoreValue::from(1.0), CoreValue::from(2.0)]);
/// let b = CoreValue::Set(vec![CoreValue::from(2.0), CoreValue::from(1.0)]);
/// let c = CoreValue::Array(vec![CoreValue::from(1.0), CoreValue::from(2.0)]);
///
/// assert_eq!(checksum(&a, &opts).unwrap(), checksum(&b, &opts).unwrap());
/// assert_ne!(checksum(&a, &opts).unwrap(), checksum(&c, &opts).unwrap());
/// ```
pub fn checksum(value: &CoreValue, options: &ChecksumOptions) -> Result<Digest, EncodeError> {
    let encode_options = if options.local {
        EncodeOptions::new()
    } else {
        EncodeOptions::only_non_local()
    };
    let mut encoder = ChecksumEncoder::new(encode_options, options.type_safe);
    encoder.convert_value(value)?;
    Ok(encoder.digest())
}

/// Streaming checksum encoder
///
/// Shared cells are hashed in place; a cell reached while it is already
/// being hashed emits a back-reference token holding the number of
/// containers between it and its first occurrence. Cyclic graphs therefore
/// hash finitely, and identically to their decoded copies whether or not
/// the cells along the cycle come back shared.
#[derive(Debug, Clone)]
pub struct ChecksumEncoder {
    options: EncodeOptions,
    type_safe: bool,
    visiting: VisitStack,
    hasher: blake3::Hasher,
    fields: Vec<(String, CoreValue)>,
}

impl ChecksumEncoder {
    pub fn new(options: EncodeOptions, type_safe: bool) -> Self {
        Self {
            options,
            type_safe,
            visiting: VisitStack::default(),
            hasher: blake3::Hasher::new(),
            fields: Vec::new(),
        }
    }

    /// Digest of everything converted so far
    pub fn digest(&self) -> Digest {
        self.hasher.finalize().into()
    }

    fn token(&mut self, bytes: &[u8]) {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    fn type_prefix(&mut self, core_type: CoreType) {
        if self.type_safe {
            self.token(core_type.code().as_bytes());
        }
    }

    fn key(&mut self, key: &str) {
        if self.type_safe {
            let mut prefixed = String::with_capacity(key.len() + 1);
            prefixed.push('k');
            prefixed.push_str(key);
            self.token(prefixed.as_bytes());
        } else {
            self.token(key.as_bytes());
        }
    }

    /// Hash sorted `(key, value)` pairs, skipping undefined values
    fn entries(&mut self, core_type: CoreType, mut entries: Vec<(String, &CoreValue)>) -> Result<(), EncodeError> {
        entries.retain(|(_, v)| !v.is_undefined());
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.type_prefix(core_type);
        self.token(b"{");
        self.visiting.enter();
        let result = entries.into_iter().try_for_each(|(key, value)| {
            self.key(&key);
            self.convert_value(value)
        });
        self.visiting.leave();
        result?;
        self.token(b"}");
        Ok(())
    }

    fn sequence<'a>(&mut self, items: impl Iterator<Item = &'a CoreValue>) -> Result<(), EncodeError> {
        self.token(b"[");
        self.visiting.enter();
        let result = items.into_iter().try_for_each(|item| self.convert_value(item));
        self.visiting.leave();
        result?;
        self.token(b"]");
        Ok(())
    }
}

impl FieldSink for ChecksumEncoder {
    fn set(&mut self, key: &str, value: &CoreValue) -> Result<(), EncodeError> {
        if self.options.include_key(key) {
            self.fields.push((key.to_string(), value.clone()));
        }
        Ok(())
    }
}

impl ValueEncoder for ChecksumEncoder {
    type Output = ();
    type Fields = Vec<(String, CoreValue)>;

    fn options(&self) -> &EncodeOptions {
        &self.options
    }

    fn visiting(&self) -> &VisitStack {
        &self.visiting
    }

    fn new_encoder(&self) -> Self {
        Self {
            options: self.options.clone(),
            type_safe: self.type_safe,
            visiting: self.visiting.clone(),
            hasher: blake3::Hasher::new(),
            fields: Vec::new(),
        }
    }

    fn finish(self) -> Self::Fields {
        self.fields
    }

    fn convert_undefined(&mut self) -> Result<(), EncodeError> {
        self.type_prefix(CoreType::Undefined);
        self.token(b"undefined");
        Ok(())
    }

    fn convert_null(&mut self) -> Result<(), EncodeError> {
        self.type_prefix(CoreType::Null);
        self.token(b"null");
        Ok(())
    }

    fn convert_bool(&mut self, value: bool) -> Result<(), EncodeError> {
        self.type_prefix(CoreType::Bool);
        self.token(if value { &b"true"[..] } else { &b"false"[..] });
        Ok(())
    }

    fn convert_number(&mut self, value: f64) -> Result<(), EncodeError> {
        self.type_prefix(CoreType::Number);
        // -0.0 and 0.0 are the same number.
        let value = if value == 0.0 { 0.0 } else { value };
        self.token(value.to_string().as_bytes());
        Ok(())
    }

    fn convert_string(&mut self, value: &str) -> Result<(), EncodeError> {
        self.type_prefix(CoreType::String);
        self.token(value.as_bytes());
        Ok(())
    }

    fn convert_date(&mut self, value: &DateTime<Utc>) -> Result<(), EncodeError> {
        self.type_prefix(CoreType::Date);
        let seconds = value.timestamp_millis() as f64 / 1000.0;
        self.token(seconds.to_string().as_bytes());
        Ok(())
    }

    fn convert_array(&mut self, items: &[CoreValue]) -> Result<(), EncodeError> {
        self.type_prefix(CoreType::Array);
        let options = self.options.clone();
        self.sequence(options.items(items))
    }

    fn convert_set(&mut self, items: &[CoreValue]) -> Result<(), EncodeError> {
        let options = self.options.clone();
        self.visiting.enter();
        let digests: Result<Vec<String>, EncodeError> = options
            .items(items)
            .map(|item| {
                let mut sub = self.new_encoder();
                sub.convert_value(item)?;
                Ok(sub.digest().0)
            })
            .collect();
        self.visiting.leave();
        let mut digests = digests?;
        digests.sort();

        self.type_prefix(CoreType::Set);
        self.token(b"[");
        for digest in &digests {
            self.token(digest.as_bytes());
        }
        self.token(b"]");
        Ok(())
    }

    fn convert_object(&mut self, map: &IndexMap<String, CoreValue>) -> Result<(), EncodeError> {
        let options = self.options.clone();
        let entries = options.entries(map).map(|(k, v)| (k.clone(), v)).collect();
        self.entries(CoreType::Object, entries)
    }

    fn convert_dictionary(&mut self, map: &IndexMap<CoreKey, CoreValue>) -> Result<(), EncodeError> {
        let type_safe = self.type_safe;
        let entries = map
            .iter()
            .map(|(k, v)| {
                // Keep 1 and "1" apart in type-safe mode.
                let key = match k {
                    CoreKey::Number(n) if type_safe => format!("#{}", n),
                    other => other.to_string(),
                };
                (key, v)
            })
            .collect();
        self.entries(CoreType::Dictionary, entries)
    }

    fn convert_encodable(&mut self, fields: Self::Fields) -> Result<(), EncodeError> {
        let entries = fields.iter().map(|(k, v)| (k.clone(), v)).collect();
        self.entries(CoreType::Encodable, entries)
    }

    fn convert_shared(&mut self, cell: &SharedValue) -> Result<(), EncodeError> {
        if let Some(span) = self.visiting.span(cell) {
            self.type_prefix(CoreType::Shared);
            self.token(format!("^{}", span).as_bytes());
            return Ok(());
        }
        self.visit_shared(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Encodable;
    use std::sync::Arc;

    fn digest(value: &CoreValue) -> Digest {
        checksum(value, &ChecksumOptions::default()).unwrap()
    }

    #[test]
    fn test_key_order_independent() {
        let a = CoreValue::object([("a", CoreValue::from(1.0)), ("b", CoreValue::from(2.0))]);
        let b = CoreValue::object([("b", CoreValue::from(2.0)), ("a", CoreValue::from(1.0))]);
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn test_array_order_matters() {
        let a = CoreValue::Array(vec![CoreValue::from(1.0), CoreValue::from(2.0)]);
        let b = CoreValue::Array(vec![CoreValue::from(2.0), CoreValue::from(1.0)]);
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn test_type_safe_distinguishes_types() {
        let number = CoreValue::from(1.0);
        let string = CoreValue::from("1");
        assert_ne!(digest(&number), digest(&string));

        let loose = ChecksumOptions {
            type_safe: false,
            local: false,
        };
        assert_eq!(
            checksum(&number, &loose).unwrap(),
            checksum(&string, &loose).unwrap()
        );
    }

    #[test]
    fn test_token_framing() {
        let a = CoreValue::Array(vec![CoreValue::from("ab"), CoreValue::from("c")]);
        let b = CoreValue::Array(vec![CoreValue::from("a"), CoreValue::from("bc")]);
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn test_undefined_field_same_as_missing() {
        let a = CoreValue::object([("a", CoreValue::from(1.0)), ("b", CoreValue::Undefined)]);
        let b = CoreValue::object([("a", CoreValue::from(1.0))]);
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn test_local_content_excluded_by_default() {
        let with_local = CoreValue::Array(vec![
            CoreValue::from("x"),
            CoreValue::object([("isLocal", CoreValue::from(true))]),
        ]);
        let without = CoreValue::Array(vec![CoreValue::from("x")]);
        assert_eq!(digest(&with_local), digest(&without));

        let local = ChecksumOptions {
            type_safe: true,
            local: true,
        };
        assert_ne!(
            checksum(&with_local, &local).unwrap(),
            checksum(&without, &local).unwrap()
        );
    }

    #[test]
    fn test_shared_is_transparent() {
        let plain = CoreValue::object([("v", CoreValue::from(1.0))]);
        let shared = CoreValue::shared(plain.clone());
        assert_eq!(digest(&plain), digest(&shared));
    }

    #[test]
    fn test_cycles_terminate() {
        let cell = SharedValue::new(CoreValue::Null);
        cell.set(CoreValue::object([("self", CoreValue::Shared(cell.clone()))]));
        let d1 = digest(&CoreValue::Shared(cell.clone()));
        let d2 = digest(&CoreValue::Shared(cell));
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_back_reference_ignores_inlined_cells() {
        // a -> b -> a with b shared, and the same graph with b inlined.
        let a = SharedValue::new(CoreValue::Null);
        let b = SharedValue::new(CoreValue::Array(vec![CoreValue::from("b"), CoreValue::Shared(a.clone())]));
        a.set(CoreValue::Array(vec![CoreValue::from("a"), CoreValue::Shared(b)]));

        let a2 = SharedValue::new(CoreValue::Null);
        let inlined = CoreValue::Array(vec![CoreValue::from("b"), CoreValue::Shared(a2.clone())]);
        a2.set(CoreValue::Array(vec![CoreValue::from("a"), inlined]));

        assert_eq!(digest(&CoreValue::Shared(a)), digest(&CoreValue::Shared(a2)));
    }

    #[test]
    fn test_back_reference_depth_matters() {
        let shallow = SharedValue::new(CoreValue::Null);
        shallow.set(CoreValue::Array(vec![CoreValue::Shared(shallow.clone())]));
        let deep = SharedValue::new(CoreValue::Null);
        deep.set(CoreValue::Array(vec![CoreValue::Array(vec![CoreValue::Shared(deep.clone())])]));
        assert_ne!(digest(&CoreValue::Shared(shallow)), digest(&CoreValue::Shared(deep)));
    }

    #[test]
    fn test_encodable_field_order_independent() {
        #[derive(Debug)]
        struct Forward;
        #[derive(Debug)]
        struct Backward;

        impl Encodable for Forward {
            fn serialize(&self, sink: &mut dyn FieldSink) -> Result<(), EncodeError> {
                sink.set("a", &CoreValue::from(1.0))?;
                sink.set("b", &CoreValue::from(2.0))
            }
        }

        impl Encodable for Backward {
            fn serialize(&self, sink: &mut dyn FieldSink) -> Result<(), EncodeError> {
                sink.set("b", &CoreValue::from(2.0))?;
                sink.set("a", &CoreValue::from(1.0))
            }
        }

        assert_eq!(
            digest(&CoreValue::Encodable(Arc::new(Forward))),
            digest(&CoreValue::Encodable(Arc::new(Backward)))
        );
    }

    #[test]
    fn test_digest_is_hex() {
        let d = digest(&CoreValue::Null);
        assert_eq!(d.as_str().len(), 64);
        assert!(d.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
