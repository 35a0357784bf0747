use std::collections::HashMap;

use proptest::prelude::*;
use registry_migrate::codec::{NativeValue, Number};

/// Strategy for JSON documents shaped like publication payloads
pub fn json_document_strategy() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::Bool),
        any::<i64>().prop_map(|i| serde_json::json!(i)),
        (-4_000_000i64..4_000_000).prop_map(|q| serde_json::json!(q as f64 / 4.0)),
        "[a-zA-Z0-9 æøåÆØÅ:/._-]{0,40}".prop_map(serde_json::Value::String),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(serde_json::Value::Array),
            prop::collection::hash_map("[a-zA-Z][a-zA-Z0-9]{0,15}", inner, 0..8)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
        ]
    })
}

fn number_strategy() -> impl Strategy<Value = Number> {
    prop_oneof![
        any::<i64>().prop_map(Number::Int),
        (i64::MAX as u64 + 1..=u64::MAX).prop_map(Number::UInt),
        (-1.0e12f64..1.0e12).prop_map(Number::Float),
    ]
}

/// Small integral numbers, as integers or floats, so sets repeat members
fn set_number_strategy() -> impl Strategy<Value = Number> {
    prop_oneof![
        (-4i64..4).prop_map(Number::Int),
        (-4i64..4).prop_map(|i| Number::Float(i as f64)),
    ]
}

/// Strategy for encodable native values; sets are homogeneous but may repeat
/// members in any order
pub fn native_value_strategy() -> impl Strategy<Value = NativeValue> {
    let leaf = prop_oneof![
        "[a-zA-Z0-9 ]{0,20}".prop_map(NativeValue::String),
        number_strategy().prop_map(NativeValue::Number),
        any::<bool>().prop_map(NativeValue::Bool),
        Just(NativeValue::Null),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(NativeValue::Bytes),
        prop::collection::vec("[a-c]{1,2}", 1..6)
            .prop_map(|s| NativeValue::Set(s.into_iter().map(NativeValue::String).collect())),
        prop::collection::vec(set_number_strategy(), 1..6)
            .prop_map(|s| NativeValue::Set(s.into_iter().map(NativeValue::Number).collect())),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(NativeValue::List),
            prop::collection::hash_map("[a-zA-Z_][a-zA-Z0-9_]{0,10}", inner, 0..6)
                .prop_map(|m: HashMap<String, NativeValue>| NativeValue::Map(m)),
        ]
    })
}
