use chrono::{TimeZone, Utc};
use richsync_core::value::{
    checksum, decode_cyclic, encode_cyclic, ChecksumOptions, CoreValue, EncodeOptions, JsonDecoder, JsonEncoder,
    SharedValue,
};
use richsync_core::{DecodeError, EncodeError};
use serde_json::json;

fn shared_of(value: &CoreValue) -> SharedValue {
    match value {
        CoreValue::Shared(cell) => cell.clone(),
        other => panic!("expected a shared cell, got {:?}", other),
    }
}

#[test]
fn self_cycle_roundtrip() {
    let node = SharedValue::new(CoreValue::Null);
    node.set(CoreValue::object([
        ("name", CoreValue::from("loop")),
        ("next", CoreValue::Shared(node.clone())),
    ]));
    let value = CoreValue::Shared(node);

    let json = encode_cyclic(&value, &EncodeOptions::new()).unwrap();
    let decoded = decode_cyclic(&json).unwrap();

    let cell = shared_of(&decoded);
    let next = shared_of(cell.read().get("next"));
    assert!(next.ptr_eq(&cell));
    assert_eq!(cell.read().get("name").as_str(), Some("loop"));

    let opts = ChecksumOptions::default();
    assert_eq!(checksum(&value, &opts).unwrap(), checksum(&decoded, &opts).unwrap());
}

#[test]
fn diamond_sharing_is_preserved() {
    let leaf = SharedValue::new(CoreValue::from("leaf"));
    let value = CoreValue::object([
        ("left", CoreValue::Shared(leaf.clone())),
        ("right", CoreValue::Shared(leaf)),
    ]);

    let json = encode_cyclic(&value, &EncodeOptions::new()).unwrap();
    assert_eq!(json["__r"], json!(["leaf"]));
    assert_eq!(json["__d"], json!({"left": {"__rId": 0}, "right": {"__rId": 0}}));

    let decoded = decode_cyclic(&json).unwrap();
    let left = shared_of(decoded.get("left"));
    let right = shared_of(decoded.get("right"));
    assert!(left.ptr_eq(&right));
}

#[test]
fn mutual_cycle_roundtrip() {
    let a = SharedValue::new(CoreValue::Null);
    let b = SharedValue::new(CoreValue::Null);
    a.set(CoreValue::Array(vec![CoreValue::from("a"), CoreValue::Shared(b.clone())]));
    b.set(CoreValue::Array(vec![CoreValue::from("b"), CoreValue::Shared(a.clone())]));
    let value = CoreValue::Shared(a);

    let decoded = decode_cyclic(&encode_cyclic(&value, &EncodeOptions::new()).unwrap()).unwrap();
    // `b` is reachable only once, so it comes back inlined.
    let a2 = shared_of(&decoded);
    let b2 = a2.read().as_items().unwrap()[1].clone();
    assert_eq!(b2.as_items().unwrap()[0].as_str(), Some("b"));
    let back = shared_of(&b2.as_items().unwrap()[1]);
    assert!(back.ptr_eq(&a2));

    let opts = ChecksumOptions::default();
    assert_eq!(checksum(&value, &opts).unwrap(), checksum(&decoded, &opts).unwrap());
}

#[test]
fn cycle_through_a_set_roundtrip() {
    let a = SharedValue::new(CoreValue::Null);
    let b = SharedValue::new(CoreValue::object([
        ("name", CoreValue::from("b")),
        ("owner", CoreValue::Shared(a.clone())),
    ]));
    a.set(CoreValue::object([
        ("name", CoreValue::from("a")),
        ("members", CoreValue::Set(vec![CoreValue::from("x"), CoreValue::Shared(b)])),
    ]));
    let value = CoreValue::Shared(a);

    let decoded = decode_cyclic(&encode_cyclic(&value, &EncodeOptions::new()).unwrap()).unwrap();
    let a2 = shared_of(&decoded);
    let members = a2.read().get("members").as_items().unwrap().to_vec();
    let owner = members
        .iter()
        .find_map(|m| match m.get("owner") {
            CoreValue::Shared(cell) => Some(cell.clone()),
            _ => None,
        })
        .unwrap();
    assert!(owner.ptr_eq(&a2));

    for type_safe in [true, false] {
        let opts = ChecksumOptions { type_safe, local: false };
        assert_eq!(checksum(&value, &opts).unwrap(), checksum(&decoded, &opts).unwrap());
    }
}

#[test]
fn three_cell_cycle_with_outside_entry_roundtrip() {
    let a = SharedValue::new(CoreValue::Null);
    let b = SharedValue::new(CoreValue::Null);
    let c = SharedValue::new(CoreValue::Null);
    a.set(CoreValue::Array(vec![CoreValue::from(1.0), CoreValue::Shared(b.clone())]));
    b.set(CoreValue::Array(vec![CoreValue::from(2.0), CoreValue::Shared(c.clone())]));
    c.set(CoreValue::Array(vec![CoreValue::from(3.0), CoreValue::Shared(a.clone())]));
    let value = CoreValue::object([("start", CoreValue::Shared(a)), ("also", CoreValue::Shared(b))]);

    let json = encode_cyclic(&value, &EncodeOptions::new()).unwrap();
    // `c` is only reachable through `b`, so only `a` and `b` get table slots.
    assert_eq!(json["__r"].as_array().unwrap().len(), 2);

    let decoded = decode_cyclic(&json).unwrap();
    let opts = ChecksumOptions::default();
    assert_eq!(checksum(&value, &opts).unwrap(), checksum(&decoded, &opts).unwrap());
}

#[test]
fn plain_encoder_rejects_cycles() {
    let node = SharedValue::new(CoreValue::Null);
    node.set(CoreValue::Array(vec![CoreValue::Shared(node.clone())]));
    let err = JsonEncoder::new(EncodeOptions::new())
        .encode(&CoreValue::Shared(node))
        .unwrap_err();
    assert_eq!(err, EncodeError::Cycle);
}

#[test]
fn tagged_values_roundtrip() {
    let date = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
    let value = CoreValue::object([
        ("when", CoreValue::from(date)),
        ("tags", CoreValue::Set(vec![CoreValue::from("a"), CoreValue::from("b")])),
        ("gone", CoreValue::Undefined),
        ("list", CoreValue::Array(vec![CoreValue::Undefined, CoreValue::from(2.5)])),
    ]);

    let json = encode_cyclic(&value, &EncodeOptions::new()).unwrap();
    assert_eq!(
        json,
        json!({
            "when": {"__t": "D", "__v": 1_600_000_000},
            "tags": {"__t": "S", "__v": ["a", "b"]},
            "list": [null, 2.5],
        })
    );

    let decoded = decode_cyclic(&json).unwrap();
    assert_eq!(decoded.get("when"), &CoreValue::from(date));
    assert!(decoded.get("gone").is_undefined());
    assert_eq!(
        decoded.get("list"),
        &CoreValue::Array(vec![CoreValue::Null, CoreValue::from(2.5)])
    );
}

#[test]
fn dangling_and_out_of_range_tokens() {
    assert_eq!(
        JsonDecoder::new().decode(&json!({"__rId": 3})).unwrap_err(),
        DecodeError::DanglingRef(3)
    );
    assert_eq!(
        decode_cyclic(&json!({"__r": ["x"], "__d": {"__rId": 1}})).unwrap_err(),
        DecodeError::RefOutOfRange { id: 1, len: 1 }
    );
}

#[test]
fn unknown_tag_is_a_plain_object() {
    let decoded = decode_cyclic(&json!({"__t": "Q", "__v": 1})).unwrap();
    assert_eq!(decoded.get("__t").as_str(), Some("Q"));
}
