//! Conversion of stored items into plain JSON for batch output files.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use tracing::warn;

use crate::codec::attribute::{Item, Number, TaggedValue};
use crate::codec::payload;
use crate::constants::attributes::DECOMPRESSED_DATA;

/// Convert a tagged value into plain JSON
///
/// Numbers become JSON numbers, binary becomes base64 text and sets become
/// arrays. A stored number JSON cannot represent is kept as its decimal string.
pub fn tagged_to_json(value: &TaggedValue) -> Value {
    match value {
        TaggedValue::S(s) => Value::String(s.clone()),
        TaggedValue::N(n) => number_to_json(n),
        TaggedValue::Bool(b) => Value::Bool(*b),
        TaggedValue::Null(_) => Value::Null,
        TaggedValue::B(b) => Value::String(STANDARD.encode(b)),
        TaggedValue::Ss(v) => Value::Array(v.iter().cloned().map(Value::String).collect()),
        TaggedValue::Ns(v) => Value::Array(v.iter().map(|n| number_to_json(n)).collect()),
        TaggedValue::Bs(v) => Value::Array(
            v.iter()
                .map(|b| Value::String(STANDARD.encode(b)))
                .collect(),
        ),
        TaggedValue::L(v) => Value::Array(v.iter().map(tagged_to_json).collect()),
        TaggedValue::M(m) => Value::Object(
            m.iter()
                .map(|(k, v)| (k.clone(), tagged_to_json(v)))
                .collect(),
        ),
    }
}

fn number_to_json(raw: &str) -> Value {
    match Number::parse(raw) {
        Some(Number::Int(i)) => Value::from(i),
        Some(Number::UInt(u)) => Value::from(u),
        Some(Number::Float(f)) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        None => Value::String(raw.to_string()),
    }
}

/// Convert a stored item to a JSON object
///
/// When `payload_attribute` holds a compressed document, the decoded document
/// is added under `@data_decompressed` next to the raw attribute.
pub fn item_to_json(item: &Item, payload_attribute: &str) -> Value {
    let mut object: Map<String, Value> = item
        .iter()
        .map(|(k, v)| (k.clone(), tagged_to_json(v)))
        .collect();

    if let Some(TaggedValue::B(raw)) = item.get(payload_attribute) {
        if payload::is_compressed(raw) {
            match payload::decompress(raw) {
                Ok(doc) => {
                    object.insert(DECOMPRESSED_DATA.to_string(), doc);
                }
                Err(e) => warn!(
                    attribute = payload_attribute,
                    error = %e,
                    "⚠️ EXPORT: Compressed payload did not contain JSON, exporting raw bytes only"
                ),
            }
        }
    }

    Value::Object(object)
}
