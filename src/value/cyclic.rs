//! Cyclic-reference codec
//!
//! Carries shared and cyclic value graphs over the acyclic JSON format.
//! Every [`SharedValue`](super::SharedValue) cell reachable more than once
//! (through two paths, or through itself) is moved into a reference table
//! and each occurrence is replaced by a `{"__rId": n}` token:
//!
//! ```json
//! { "__r": [ <cell 0>, <cell 1>, ... ], "__d": <data> }
//! ```
//!
//! When nothing is shared the output is the plain tagged JSON encoding.
//!
//! # Example
//!
//! ```rust
//! use richsync_core::value::{decode_cyclic, encode_cyclic, CoreValue, EncodeOptions, SharedValue};
//!
//! let node = SharedValue::new(CoreValue::Null);
//! node.set(CoreValue::object([("next", CoreValue::Shared(node.clone()))]));
//!
//! let json = encode_cyclic(&CoreValue::Shared(node), &EncodeOptions::new()).unwrap();
//! assert_eq!(
//!     json,
//!     serde_json::json!({"__r": [{"next": {"__rId": 0}}], "__d": {"__rId": 0}})
//! );
//!
//! let decoded = decode_cyclic(&json).unwrap();
//! let CoreValue::Shared(cell) = decoded else { panic!("expected a shared cell") };
//! let CoreValue::Shared(next) = cell.read().get("next").clone() else { panic!() };
//! assert!(next.ptr_eq(&cell));
//! ```

use super::encoder::{walk, EncodeOptions, ValueEncoder};
use super::json::{JsonDecoder, JsonEncoder, DATA_KEY, REF_TABLE_KEY};
use super::{CoreValue, SharedValue};
use crate::error::{DecodeError, EncodeError};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Encode a value, replacing multiply-reachable shared cells with tokens
///
/// # Errors
///
/// Fails only for values the tagged JSON format can't express (non-finite
/// numbers) or when a custom value fails to serialize.
pub fn encode_cyclic(value: &CoreValue, options: &EncodeOptions) -> Result<Value, EncodeError> {
    let shared = find_shared(value, options)?;
    if shared.is_empty() {
        return JsonEncoder::new(options.clone()).encode(value);
    }

    let ref_ids: HashMap<usize, u64> = shared
        .iter()
        .enumerate()
        .map(|(idx, cell)| (cell.id(), idx as u64))
        .collect();
    let mut encoder = JsonEncoder::with_ref_ids(options.clone(), ref_ids);

    // Table entries hold the cell's content; the cell itself would encode
    // as its own token.
    let mut table = Vec::with_capacity(shared.len());
    for cell in &shared {
        let inner = cell.read().clone();
        table.push(encoder.convert_value(&inner)?);
    }
    let data = encoder.convert_value(value)?;

    let mut envelope = Map::with_capacity(2);
    envelope.insert(REF_TABLE_KEY.to_string(), Value::Array(table));
    envelope.insert(DATA_KEY.to_string(), data);
    Ok(Value::Object(envelope))
}

/// Decode the output of [`encode_cyclic`], rebuilding shared cells
///
/// # Errors
///
/// Returns [`DecodeError::DanglingRef`] for a token outside of any
/// envelope and [`DecodeError::RefOutOfRange`] for a token past the end of
/// its table.
pub fn decode_cyclic(value: &Value) -> Result<CoreValue, DecodeError> {
    JsonDecoder::new().decode(value)
}

/// Shared cells reachable more than once, in first-seen order
fn find_shared(value: &CoreValue, options: &EncodeOptions) -> Result<Vec<SharedValue>, EncodeError> {
    let mut seen: HashMap<usize, (usize, SharedValue)> = HashMap::new();
    let mut order: Vec<usize> = Vec::new();
    walk(value, options, &mut |cell| {
        let id = cell.id();
        match seen.get_mut(&id) {
            Some((count, _)) => {
                *count += 1;
                false
            }
            None => {
                seen.insert(id, (1, cell.clone()));
                order.push(id);
                true
            }
        }
    })?;

    Ok(order
        .into_iter()
        .filter_map(|id| match seen.remove(&id) {
            Some((count, cell)) if count > 1 => Some(cell),
            _ => None,
        })
        .collect())
}
