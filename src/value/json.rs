//! Tagged JSON wire format
//!
//! Values that JSON can't express directly are wrapped in a two-key object:
//!
//! | Value | Encoding |
//! |---|---|
//! | set | `{"__t": "S", "__v": [..]}` |
//! | date | `{"__t": "D", "__v": <unix seconds>}` |
//! | custom-serializable | `{"__t": "E", "__v": {..fields..}}` |
//!
//! `undefined` fields are left out of objects and become `null` inside
//! sequences. Dictionaries become plain objects with stringified keys, and
//! lazy sequences become arrays.
//!
//! # Example
//!
//! ```rust
//! use richsync_core::value::{CoreValue, JsonDecoder, JsonEncoder};
//!
//! let value = CoreValue::object([
//!     ("tags", CoreValue::Set(vec![CoreValue::from("a"), CoreValue::from("b")])),
//!     ("gone", CoreValue::Undefined),
//! ]);
//!
//! let json = JsonEncoder::default().encode(&value).unwrap();
//! assert_eq!(json, serde_json::json!({"tags": {"__t": "S", "__v": ["a", "b"]}}));
//!
//! let decoded = JsonDecoder::new().decode(&json).unwrap();
//! assert_eq!(decoded.get("tags").as_items().unwrap().len(), 2);
//! ```

use super::encoder::{EncodeOptions, Encodable, FieldSink, ValueEncoder, VisitStack};
use super::{CoreKey, CoreValue, SharedValue};
use crate::error::{DecodeError, EncodeError};
use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Tag key of a wrapped value
pub const TAG_KEY: &str = "__t";
/// Payload key of a wrapped value
pub const VALUE_KEY: &str = "__v";
/// Key of a back-reference token
pub const REF_ID_KEY: &str = "__rId";
/// Reference table key of a cyclic envelope
pub const REF_TABLE_KEY: &str = "__r";
/// Data key of a cyclic envelope
pub const DATA_KEY: &str = "__d";

const TAG_SET: &str = "S";
const TAG_DATE: &str = "D";
const TAG_ENCODABLE: &str = "E";

/// Encodes [`CoreValue`]s as tagged JSON
#[derive(Debug, Clone, Default)]
pub struct JsonEncoder {
    options: EncodeOptions,
    visiting: VisitStack,
    /// Shared cells emitted as `{"__rId": n}` tokens
    ref_ids: Option<Rc<HashMap<usize, u64>>>,
    fields: Map<String, Value>,
}

impl JsonEncoder {
    pub fn new(options: EncodeOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Encoder that replaces the given shared cells with reference tokens
    pub(crate) fn with_ref_ids(options: EncodeOptions, ref_ids: HashMap<usize, u64>) -> Self {
        Self {
            options,
            ref_ids: Some(Rc::new(ref_ids)),
            ..Self::default()
        }
    }

    /// Encode a value
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::Cycle`] if the value contains a cycle and
    /// [`EncodeError::Unsupported`] for non-finite numbers.
    pub fn encode(&mut self, value: &CoreValue) -> Result<Value, EncodeError> {
        self.convert_value(value)
    }

    /// Encode a value and serialize it to a JSON string
    pub fn encode_to_string(&mut self, value: &CoreValue) -> Result<String, EncodeError> {
        Ok(self.encode(value)?.to_string())
    }

    fn tagged(tag: &str, payload: Value) -> Value {
        let mut map = Map::with_capacity(2);
        map.insert(TAG_KEY.to_string(), Value::String(tag.to_string()));
        map.insert(VALUE_KEY.to_string(), payload);
        Value::Object(map)
    }

    fn convert_items<'a>(
        &mut self,
        items: impl Iterator<Item = &'a CoreValue>,
    ) -> Result<Vec<Value>, EncodeError> {
        items.map(|item| self.convert_value(item)).collect()
    }
}

/// Build a `{"__rId": n}` token
pub(crate) fn ref_token(id: u64) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(REF_ID_KEY.to_string(), Value::from(id));
    Value::Object(map)
}

impl FieldSink for JsonEncoder {
    fn set(&mut self, key: &str, value: &CoreValue) -> Result<(), EncodeError> {
        if value.is_undefined() || !self.options.include_key(key) {
            return Ok(());
        }
        let encoded = self.convert_value(value)?;
        self.fields.insert(key.to_string(), encoded);
        Ok(())
    }
}

impl ValueEncoder for JsonEncoder {
    type Output = Value;
    type Fields = Map<String, Value>;

    fn options(&self) -> &EncodeOptions {
        &self.options
    }

    fn visiting(&self) -> &VisitStack {
        &self.visiting
    }

    fn new_encoder(&self) -> Self {
        Self {
            options: self.options.clone(),
            visiting: self.visiting.clone(),
            ref_ids: self.ref_ids.clone(),
            fields: Map::new(),
        }
    }

    fn finish(self) -> Self::Fields {
        self.fields
    }

    fn convert_undefined(&mut self) -> Result<Value, EncodeError> {
        Ok(Value::Null)
    }

    fn convert_null(&mut self) -> Result<Value, EncodeError> {
        Ok(Value::Null)
    }

    fn convert_bool(&mut self, value: bool) -> Result<Value, EncodeError> {
        Ok(Value::Bool(value))
    }

    fn convert_number(&mut self, value: f64) -> Result<Value, EncodeError> {
        if !value.is_finite() {
            return Err(EncodeError::Unsupported(format!(
                "non-finite number {}",
                value
            )));
        }
        // Whole numbers go out as integers so other runtimes read them back
        // as such.
        if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
            return Ok(Value::from(value as i64));
        }
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .ok_or_else(|| EncodeError::Unsupported(format!("number {}", value)))
    }

    fn convert_string(&mut self, value: &str) -> Result<Value, EncodeError> {
        Ok(Value::String(value.to_string()))
    }

    fn convert_date(&mut self, value: &DateTime<Utc>) -> Result<Value, EncodeError> {
        let seconds = value.timestamp_millis() as f64 / 1000.0;
        let payload = self.convert_number(seconds)?;
        Ok(Self::tagged(TAG_DATE, payload))
    }

    fn convert_array(&mut self, items: &[CoreValue]) -> Result<Value, EncodeError> {
        let options = self.options.clone();
        Ok(Value::Array(self.convert_items(options.items(items))?))
    }

    fn convert_set(&mut self, items: &[CoreValue]) -> Result<Value, EncodeError> {
        let options = self.options.clone();
        let encoded = self.convert_items(options.items(items))?;
        Ok(Self::tagged(TAG_SET, Value::Array(encoded)))
    }

    fn convert_object(&mut self, map: &IndexMap<String, CoreValue>) -> Result<Value, EncodeError> {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            if value.is_undefined() || !self.options.include_key(key) {
                continue;
            }
            out.insert(key.clone(), self.convert_value(value)?);
        }
        Ok(Value::Object(out))
    }

    fn convert_dictionary(&mut self, map: &IndexMap<CoreKey, CoreValue>) -> Result<Value, EncodeError> {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            if value.is_undefined() {
                continue;
            }
            out.insert(key.to_string(), self.convert_value(value)?);
        }
        Ok(Value::Object(out))
    }

    fn convert_encodable(&mut self, fields: Map<String, Value>) -> Result<Value, EncodeError> {
        Ok(Self::tagged(TAG_ENCODABLE, Value::Object(fields)))
    }

    fn convert_shared(&mut self, cell: &SharedValue) -> Result<Value, EncodeError> {
        if let Some(id) = self.ref_ids.as_ref().and_then(|ids| ids.get(&cell.id())) {
            return Ok(ref_token(*id));
        }
        if self.visiting.contains(cell) {
            return Err(EncodeError::Cycle);
        }
        self.visit_shared(cell)
    }
}

/// Fields of a decoded custom-serializable value
///
/// Decoding can't recover the original Rust type, so the fields are kept in
/// order and replayed verbatim when the value is encoded again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFields(pub IndexMap<String, CoreValue>);

impl Encodable for DecodedFields {
    fn serialize(&self, sink: &mut dyn FieldSink) -> Result<(), EncodeError> {
        self.0.serialize(sink)
    }
}

/// Decodes tagged JSON back into [`CoreValue`]s
///
/// `{"__rId"}` tokens resolve against the innermost enclosing
/// `{"__r", "__d"}` envelope; outside of one they are an error.
#[derive(Debug, Default)]
pub struct JsonDecoder {
    scopes: Vec<Vec<SharedValue>>,
}

impl JsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a JSON value
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::DanglingRef`] or [`DecodeError::RefOutOfRange`]
    /// for reference tokens that don't resolve, and
    /// [`DecodeError::Malformed`] for tagged values with an invalid payload.
    pub fn decode(&mut self, value: &Value) -> Result<CoreValue, DecodeError> {
        match value {
            Value::Array(items) => Ok(CoreValue::Array(
                items
                    .iter()
                    .map(|item| self.decode(item))
                    .collect::<Result<_, _>>()?,
            )),
            Value::Object(map) => self.decode_object(map),
            other => Ok(CoreValue::from_plain_json(other)),
        }
    }

    /// Parse a JSON string and decode it
    pub fn decode_str(&mut self, json: &str) -> Result<CoreValue, DecodeError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        self.decode(&value)
    }

    fn decode_object(&mut self, map: &Map<String, Value>) -> Result<CoreValue, DecodeError> {
        if map.len() == 1 {
            if let Some(token) = map.get(REF_ID_KEY) {
                return self.resolve_ref(token);
            }
        }
        if map.len() == 2 {
            if let (Some(table), Some(data)) = (map.get(REF_TABLE_KEY), map.get(DATA_KEY)) {
                return self.decode_envelope(table, data);
            }
            if let (Some(Value::String(tag)), Some(payload)) = (map.get(TAG_KEY), map.get(VALUE_KEY)) {
                if let Some(decoded) = self.decode_tagged(tag, payload)? {
                    return Ok(decoded);
                }
            }
        }
        let mut out = IndexMap::with_capacity(map.len());
        for (key, value) in map {
            out.insert(key.clone(), self.decode(value)?);
        }
        Ok(CoreValue::Object(out))
    }

    /// Decode a `{"__t", "__v"}` pair, `None` for an unknown tag
    fn decode_tagged(&mut self, tag: &str, payload: &Value) -> Result<Option<CoreValue>, DecodeError> {
        let decoded = match tag {
            TAG_SET => match payload {
                Value::Array(items) => CoreValue::Set(
                    items
                        .iter()
                        .map(|item| self.decode(item))
                        .collect::<Result<_, _>>()?,
                ),
                _ => return Err(DecodeError::Malformed("set payload must be an array".into())),
            },
            TAG_DATE => {
                let seconds = payload
                    .as_f64()
                    .ok_or_else(|| DecodeError::Malformed("date payload must be a number".into()))?;
                let date = Utc
                    .timestamp_millis_opt((seconds * 1000.0).round() as i64)
                    .single()
                    .ok_or_else(|| DecodeError::Malformed(format!("date out of range: {}", seconds)))?;
                CoreValue::Date(date)
            }
            TAG_ENCODABLE => match payload {
                Value::Object(fields) => {
                    let mut out = IndexMap::with_capacity(fields.len());
                    for (key, value) in fields {
                        out.insert(key.clone(), self.decode(value)?);
                    }
                    CoreValue::Encodable(Arc::new(DecodedFields(out)))
                }
                _ => {
                    return Err(DecodeError::Malformed(
                        "custom value payload must be an object".into(),
                    ))
                }
            },
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    fn resolve_ref(&self, token: &Value) -> Result<CoreValue, DecodeError> {
        let id = token
            .as_u64()
            .ok_or_else(|| DecodeError::Malformed(format!("invalid reference token {}", token)))?;
        let scope = self.scopes.last().ok_or(DecodeError::DanglingRef(id))?;
        scope
            .get(id as usize)
            .map(|cell| CoreValue::Shared(cell.clone()))
            .ok_or(DecodeError::RefOutOfRange {
                id,
                len: scope.len(),
            })
    }

    fn decode_envelope(&mut self, table: &Value, data: &Value) -> Result<CoreValue, DecodeError> {
        let entries = table
            .as_array()
            .ok_or_else(|| DecodeError::Malformed("reference table must be an array".into()))?;
        // Cells exist before their content so entries can refer to each other.
        let cells: Vec<SharedValue> = entries
            .iter()
            .map(|_| SharedValue::new(CoreValue::Undefined))
            .collect();
        self.scopes.push(cells.clone());
        let result = self.fill_envelope(entries, &cells, data);
        self.scopes.pop();
        result
    }

    fn fill_envelope(
        &mut self,
        entries: &[Value],
        cells: &[SharedValue],
        data: &Value,
    ) -> Result<CoreValue, DecodeError> {
        for (entry, cell) in entries.iter().zip(cells) {
            let decoded = self.decode(entry)?;
            cell.set(decoded);
        }
        self.decode(data)
    }
}
