//! Document <-> [`CoreValue`] envelope
//!
//! On the value layer a document is an object with two fields:
//!
//! ```text
//! { root: <element>, pointers: Set<{ key, ref, expiration? }> }
//! ```
//!
//! Nodes are objects tagged by `kind`. Replica-local nodes carry
//! `isLocal: true`, which is what the encoders' non-local filter looks at,
//! so the checksum and the wire encoding of the shared projection both skip
//! them without any document-specific code. Pointers form a set because
//! their order carries no meaning.

use super::tree::{Document, ElementNode, Mark, Marks, NodeKey, Pointer, RefMarker, RefType, TextNode, TreeNode};
use crate::error::{DecodeError, EncodeError};
use crate::orderstamp::OrderStamp;
use crate::value::{
    checksum, decode_cyclic, encode_cyclic, ChecksumOptions, CoreValue, Digest, Encodable, EncodeOptions, FieldSink,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

const KIND_ELEMENT: &str = "element";
const KIND_TEXT: &str = "text";
const KIND_REF: &str = "ref";

impl Document {
    /// The document as a value
    pub fn to_core_value(&self) -> CoreValue {
        CoreValue::object([("root", element_value(&self.root)), ("pointers", pointers_value(self))])
    }

    /// Rebuild a document from [`Document::to_core_value`] output
    ///
    /// Accepts the plain object form, a custom-serialized document and
    /// shared cells wrapping either.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] when the value does not have the
    /// document shape.
    pub fn from_core_value(value: &CoreValue) -> Result<Document, DecodeError> {
        let fields = fields_of(value)?;
        let root = match fields.get("root").map(node_from_value).transpose()? {
            Some(TreeNode::Element(e)) => e,
            Some(other) => return Err(malformed(format!("document root is a {}", other.kind()))),
            None => return Err(malformed("document has no root")),
        };

        let mut pointers = BTreeMap::new();
        match fields.get("pointers").map(resolve) {
            None | Some(CoreValue::Undefined) => {}
            Some(CoreValue::Set(items)) | Some(CoreValue::Array(items)) => {
                for item in &items {
                    let (key, pointer) = pointer_from_value(item)?;
                    pointers.insert(key, pointer);
                }
            }
            Some(other) => {
                return Err(malformed(format!(
                    "pointers must be a set, found {:?}",
                    other.core_type()
                )))
            }
        }

        Ok(Document { root, pointers })
    }

    /// Encode to tagged JSON through the cyclic codec
    ///
    /// # Errors
    ///
    /// Fails when an attribute holds a non-finite number.
    pub fn encode(&self, options: &EncodeOptions) -> Result<Value, EncodeError> {
        encode_cyclic(&self.to_core_value(), options)
    }

    /// Decode the output of [`Document::encode`]
    pub fn decode(json: &Value) -> Result<Document, DecodeError> {
        Document::from_core_value(&decode_cyclic(json)?)
    }

    /// Canonical digest of the document
    ///
    /// Unless `options.local` is set, replica-local nodes don't contribute.
    ///
    /// # Example
    ///
    /// ```rust
    /// use richsync_core::orderstamp;
    /// use richsync_core::richtext::{Document, NodeKey, TextNode};
    /// use richsync_core::value::ChecksumOptions;
    ///
    /// let plain = Document::new();
    /// let mut with_cursor = Document::new();
    /// with_cursor.root.children[0]
    ///     .as_element_mut()
    ///     .unwrap()
    ///     .insert_child(TextNode::new(NodeKey::new("caret"), orderstamp::present(), "|").local().into());
    ///
    /// let opts = ChecksumOptions::default();
    /// assert_eq!(plain.checksum(&opts).unwrap(), with_cursor.checksum(&opts).unwrap());
    /// ```
    pub fn checksum(&self, options: &ChecksumOptions) -> Result<Digest, EncodeError> {
        checksum(&self.to_core_value(), options)
    }
}

impl Encodable for Document {
    fn serialize(&self, sink: &mut dyn FieldSink) -> Result<(), EncodeError> {
        sink.set("root", &element_value(&self.root))?;
        sink.set("pointers", &pointers_value(self))
    }
}

fn malformed(msg: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(msg.into())
}

fn local_flag(is_local: bool) -> CoreValue {
    if is_local {
        CoreValue::Bool(true)
    } else {
        CoreValue::Undefined
    }
}

fn node_value(node: &TreeNode) -> CoreValue {
    match node {
        TreeNode::Element(e) => element_value(e),
        TreeNode::Text(t) => text_value(t),
        TreeNode::Ref(r) => ref_value(r),
    }
}

fn element_value(element: &ElementNode) -> CoreValue {
    let tag = element.tag.as_deref().map_or(CoreValue::Undefined, CoreValue::from);
    let attrs = if element.attrs.is_empty() {
        CoreValue::Undefined
    } else {
        CoreValue::Object(
            element
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), CoreValue::from_plain_json(v)))
                .collect(),
        )
    };
    CoreValue::object([
        ("kind", CoreValue::from(KIND_ELEMENT)),
        ("key", CoreValue::from(element.key.as_str())),
        ("order", CoreValue::from(element.order.as_str())),
        ("tag", tag),
        ("attrs", attrs),
        ("children", CoreValue::Array(element.children.iter().map(node_value).collect())),
        ("isLocal", local_flag(element.is_local)),
    ])
}

fn text_value(text: &TextNode) -> CoreValue {
    let marks: Vec<CoreValue> = text.marks.active().map(|m| CoreValue::from(m.as_str())).collect();
    CoreValue::object([
        ("kind", CoreValue::from(KIND_TEXT)),
        ("key", CoreValue::from(text.key.as_str())),
        ("order", CoreValue::from(text.order.as_str())),
        ("text", CoreValue::from(text.text.as_str())),
        (
            "marks",
            if marks.is_empty() {
                CoreValue::Undefined
            } else {
                CoreValue::Set(marks)
            },
        ),
        ("isLocal", local_flag(text.is_local)),
    ])
}

fn ref_value(marker: &RefMarker) -> CoreValue {
    CoreValue::object([
        ("kind", CoreValue::from(KIND_REF)),
        ("key", CoreValue::from(marker.key.as_str())),
        ("order", CoreValue::from(marker.order.as_str())),
        ("ref", CoreValue::from(marker.ref_key.as_str())),
        ("type", CoreValue::from(marker.ref_type.as_str())),
        ("isLocal", local_flag(marker.is_local)),
    ])
}

/// Pointers of markers that only live in replica-local content are flagged
/// local, so the non-local projection drops them with their markers.
fn pointers_value(doc: &Document) -> CoreValue {
    let shared: HashSet<&NodeKey> = doc.non_local_markers().into_iter().map(|m| &m.key).collect();
    CoreValue::Set(
        doc.pointers
            .iter()
            .map(|(key, pointer)| {
                let is_local = !shared.contains(key) && doc.contains(key);
                CoreValue::object([
                    ("key", CoreValue::from(key.as_str())),
                    ("ref", CoreValue::from(pointer.ref_key.as_str())),
                    ("expiration", pointer.expiration.map_or(CoreValue::Undefined, CoreValue::from)),
                    ("isLocal", local_flag(is_local)),
                ])
            })
            .collect(),
    )
}

/// Look through shared cells
fn resolve(value: &CoreValue) -> CoreValue {
    match value {
        CoreValue::Shared(cell) => resolve(&cell.read()),
        other => other.clone(),
    }
}

/// Collects the fields of a custom-serialized value
struct FieldCollector(IndexMap<String, CoreValue>);

impl FieldSink for FieldCollector {
    fn set(&mut self, key: &str, value: &CoreValue) -> Result<(), EncodeError> {
        self.0.insert(key.to_string(), value.clone());
        Ok(())
    }
}

fn fields_of(value: &CoreValue) -> Result<IndexMap<String, CoreValue>, DecodeError> {
    match resolve(value) {
        CoreValue::Object(map) => Ok(map),
        CoreValue::Encodable(obj) => {
            let mut collector = FieldCollector(IndexMap::new());
            obj.serialize(&mut collector)
                .map_err(|e| malformed(format!("custom value failed to serialize: {}", e)))?;
            Ok(collector.0)
        }
        other => Err(malformed(format!("expected an object, found {:?}", other.core_type()))),
    }
}

fn string_field(fields: &IndexMap<String, CoreValue>, name: &str) -> Result<String, DecodeError> {
    match fields.get(name).map(resolve) {
        Some(CoreValue::String(s)) => Ok(s),
        _ => Err(malformed(format!("missing string field `{}`", name))),
    }
}

fn local_field(fields: &IndexMap<String, CoreValue>) -> bool {
    matches!(fields.get("isLocal").map(resolve), Some(CoreValue::Bool(true)))
}

fn node_from_value(value: &CoreValue) -> Result<TreeNode, DecodeError> {
    let fields = fields_of(value)?;
    let key = NodeKey::new(string_field(&fields, "key")?);
    let order = OrderStamp::from_raw(string_field(&fields, "order")?);
    let is_local = local_field(&fields);

    match string_field(&fields, "kind")?.as_str() {
        KIND_ELEMENT => {
            let tag = match fields.get("tag").map(resolve) {
                None | Some(CoreValue::Undefined) | Some(CoreValue::Null) => None,
                Some(CoreValue::String(s)) => Some(s),
                Some(_) => return Err(malformed(format!("tag of {} must be a string", key))),
            };
            let mut attrs = BTreeMap::new();
            match fields.get("attrs").map(resolve) {
                None | Some(CoreValue::Undefined) => {}
                Some(CoreValue::Object(map)) => {
                    for (name, v) in &map {
                        attrs.insert(name.clone(), plain_json(v)?);
                    }
                }
                Some(_) => return Err(malformed(format!("attrs of {} must be an object", key))),
            }
            let children = match fields.get("children").map(resolve) {
                None | Some(CoreValue::Undefined) => Vec::new(),
                Some(CoreValue::Array(items)) => items.iter().map(node_from_value).collect::<Result<_, _>>()?,
                Some(_) => return Err(malformed(format!("children of {} must be an array", key))),
            };
            let mut element = ElementNode {
                key,
                order,
                tag,
                attrs,
                children,
                is_local,
            };
            element.sort_children();
            Ok(element.into())
        }
        KIND_TEXT => {
            let mut marks = Marks::default();
            if let Some(CoreValue::Set(items)) | Some(CoreValue::Array(items)) = fields.get("marks").map(resolve) {
                for item in &items {
                    let name = item.as_str().unwrap_or_default();
                    let mark = Mark::ALL
                        .into_iter()
                        .find(|m| m.as_str() == name)
                        .ok_or_else(|| malformed(format!("unknown mark `{}` on {}", name, key)))?;
                    marks.set(mark, true);
                }
            }
            Ok(TextNode {
                key,
                order,
                text: string_field(&fields, "text")?,
                marks,
                is_local,
            }
            .into())
        }
        KIND_REF => {
            let ref_type = string_field(&fields, "type")?;
            let ref_type = RefType::parse(&ref_type)
                .ok_or_else(|| malformed(format!("unknown ref type `{}` on {}", ref_type, key)))?;
            Ok(RefMarker {
                key,
                order,
                ref_key: string_field(&fields, "ref")?,
                ref_type,
                is_local,
            }
            .into())
        }
        other => Err(malformed(format!("unknown node kind `{}`", other))),
    }
}

fn pointer_from_value(value: &CoreValue) -> Result<(NodeKey, Pointer), DecodeError> {
    let fields = fields_of(value)?;
    let expiration = match fields.get("expiration").map(resolve) {
        None | Some(CoreValue::Undefined) | Some(CoreValue::Null) => None,
        Some(CoreValue::Date(at)) => Some(at),
        Some(_) => return Err(malformed("pointer expiration must be a date")),
    };
    Ok((
        NodeKey::new(string_field(&fields, "key")?),
        Pointer {
            ref_key: string_field(&fields, "ref")?,
            expiration,
        },
    ))
}

/// Attribute value back to plain JSON
fn plain_json(value: &CoreValue) -> Result<Value, DecodeError> {
    Ok(match resolve(value) {
        CoreValue::Undefined | CoreValue::Null => Value::Null,
        CoreValue::Bool(b) => Value::Bool(b),
        CoreValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                Value::from(n as i64)
            } else {
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or_else(|| malformed(format!("attribute number {} is not finite", n)))?
            }
        }
        CoreValue::String(s) => Value::String(s),
        CoreValue::Array(items) => Value::Array(items.iter().map(plain_json).collect::<Result<_, _>>()?),
        CoreValue::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), plain_json(v)?)))
                .collect::<Result<_, DecodeError>>()?,
        ),
        other => {
            return Err(malformed(format!(
                "attribute values must be plain JSON, found {:?}",
                other.core_type()
            )))
        }
    })
}
