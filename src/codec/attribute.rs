//! # Attribute Codec
//!
//! Bidirectional mapping between native values and the store's tagged attribute
//! representation. A [`TaggedValue`] serializes as a single-key object whose key
//! is the store's type tag (`{"S": "x"}`, `{"N": "42"}`, `{"SS": [..]}`), which
//! is also the store's own JSON wire shape.
//!
//! Encoding never coerces: mixed-type sets, empty sets and non-finite numbers are
//! rejected with [`MigrationError::UnsupportedType`] naming the offending value.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// A stored item: attribute name to tagged value
pub type Item = HashMap<String, TaggedValue>;

/// Named native values used to build mutations
pub type AttributeMap = HashMap<String, NativeValue>;

/// The store's tagged-union attribute encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaggedValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "B", with = "base64_bytes")]
    B(Vec<u8>),
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    #[serde(rename = "NS")]
    Ns(Vec<String>),
    #[serde(rename = "BS", with = "base64_bytes_list")]
    Bs(Vec<Vec<u8>>),
    #[serde(rename = "L")]
    L(Vec<TaggedValue>),
    #[serde(rename = "M")]
    M(HashMap<String, TaggedValue>),
}

impl TaggedValue {
    /// The store's type tag for this value
    pub fn type_tag(&self) -> &'static str {
        match self {
            TaggedValue::S(_) => "S",
            TaggedValue::N(_) => "N",
            TaggedValue::Bool(_) => "BOOL",
            TaggedValue::Null(_) => "NULL",
            TaggedValue::B(_) => "B",
            TaggedValue::Ss(_) => "SS",
            TaggedValue::Ns(_) => "NS",
            TaggedValue::Bs(_) => "BS",
            TaggedValue::L(_) => "L",
            TaggedValue::M(_) => "M",
        }
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            TaggedValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<&str> {
        match self {
            TaggedValue::N(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_b(&self) -> Option<&[u8]> {
        match self {
            TaggedValue::B(b) => Some(b),
            _ => None,
        }
    }

    /// Approximate stored size in bytes, following the store's sizing rules
    /// closely enough to enforce the item size limit.
    pub fn approximate_size(&self) -> usize {
        match self {
            TaggedValue::S(s) | TaggedValue::N(s) => s.len(),
            TaggedValue::Bool(_) | TaggedValue::Null(_) => 1,
            TaggedValue::B(b) => b.len(),
            TaggedValue::Ss(v) | TaggedValue::Ns(v) => v.iter().map(String::len).sum(),
            TaggedValue::Bs(v) => v.iter().map(Vec::len).sum(),
            TaggedValue::L(v) => 3 + v.iter().map(|e| 1 + e.approximate_size()).sum::<usize>(),
            TaggedValue::M(m) => {
                3 + m
                    .iter()
                    .map(|(k, v)| 1 + k.len() + v.approximate_size())
                    .sum::<usize>()
            }
        }
    }
}

/// Approximate stored size of a whole item
pub fn item_size(item: &Item) -> usize {
    item.iter().map(|(k, v)| k.len() + v.approximate_size()).sum()
}

/// A numeric native value
///
/// Equality is numeric: `Int(3) == Float(3.0)`, matching how the store compares
/// its decimal-string numbers.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Number {
    /// Render as a plain decimal string: no locale grouping, no exponent
    pub fn to_decimal_string(&self) -> Result<String> {
        match *self {
            Number::Int(i) => Ok(i.to_string()),
            Number::UInt(u) => Ok(u.to_string()),
            Number::Float(f) if !f.is_finite() => Err(MigrationError::unsupported_type(
                "non-finite number",
                format!("{f} cannot be stored as a decimal"),
            )),
            // -0.0 renders as "-0"
            Number::Float(f) if f == 0.0 => Ok("0".to_string()),
            Number::Float(f) => Ok(f.to_string()),
        }
    }

    /// Parse a stored decimal string, preferring integer representations
    pub fn parse(raw: &str) -> Option<Number> {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Some(Number::Int(i));
        }
        if let Ok(u) = trimmed.parse::<u64>() {
            return Some(Number::UInt(u));
        }
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Number::Float)
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(i) => i as f64,
            Number::UInt(u) => u as f64,
            Number::Float(f) => f,
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (Number::UInt(a), Number::UInt(b)) => a == b,
            (Number::Int(a), Number::UInt(b)) | (Number::UInt(b), Number::Int(a)) => {
                i128::from(*a) == i128::from(*b)
            }
            _ => match (self.to_decimal_string(), other.to_decimal_string()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Number::Int(i) => write!(f, "{i}"),
            Number::UInt(u) => write!(f, "{u}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

/// A native value that can be written to the store
#[derive(Debug, Clone)]
pub enum NativeValue {
    String(String),
    Number(Number),
    Bool(bool),
    Null,
    Bytes(Vec<u8>),
    /// Unordered set; must be non-empty and homogeneous (strings, numbers or bytes)
    Set(Vec<NativeValue>),
    List(Vec<NativeValue>),
    Map(HashMap<String, NativeValue>),
}

impl NativeValue {
    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        NativeValue::Bytes(value.into())
    }

    pub fn string_set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NativeValue::Set(values.into_iter().map(|s| NativeValue::String(s.into())).collect())
    }

    /// Human-readable type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeValue::String(_) => "string",
            NativeValue::Number(Number::Float(_)) => "float",
            NativeValue::Number(_) => "integer",
            NativeValue::Bool(_) => "boolean",
            NativeValue::Null => "null",
            NativeValue::Bytes(_) => "bytes",
            NativeValue::Set(_) => "set",
            NativeValue::List(_) => "list",
            NativeValue::Map(_) => "map",
        }
    }
}

/// Sets compare as sets: member order and repeated members are ignored
impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NativeValue::String(a), NativeValue::String(b)) => a == b,
            (NativeValue::Number(a), NativeValue::Number(b)) => a == b,
            (NativeValue::Bool(a), NativeValue::Bool(b)) => a == b,
            (NativeValue::Null, NativeValue::Null) => true,
            (NativeValue::Bytes(a), NativeValue::Bytes(b)) => a == b,
            (NativeValue::Set(a), NativeValue::Set(b)) => {
                a.iter().all(|m| b.contains(m)) && b.iter().all(|m| a.contains(m))
            }
            (NativeValue::List(a), NativeValue::List(b)) => a == b,
            (NativeValue::Map(a), NativeValue::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        NativeValue::String(value.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(value: String) -> Self {
        NativeValue::String(value)
    }
}

impl From<bool> for NativeValue {
    fn from(value: bool) -> Self {
        NativeValue::Bool(value)
    }
}

impl From<i64> for NativeValue {
    fn from(value: i64) -> Self {
        NativeValue::Number(Number::Int(value))
    }
}

impl From<i32> for NativeValue {
    fn from(value: i32) -> Self {
        NativeValue::Number(Number::Int(i64::from(value)))
    }
}

impl From<u64> for NativeValue {
    fn from(value: u64) -> Self {
        NativeValue::Number(Number::UInt(value))
    }
}

impl From<f64> for NativeValue {
    fn from(value: f64) -> Self {
        NativeValue::Number(Number::Float(value))
    }
}

impl From<serde_json::Value> for NativeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => NativeValue::Null,
            serde_json::Value::Bool(b) => NativeValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    NativeValue::Number(Number::Int(i))
                } else if let Some(u) = n.as_u64() {
                    NativeValue::Number(Number::UInt(u))
                } else {
                    NativeValue::Number(Number::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => NativeValue::String(s),
            serde_json::Value::Array(values) => {
                NativeValue::List(values.into_iter().map(NativeValue::from).collect())
            }
            serde_json::Value::Object(map) => NativeValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, NativeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Encode a native value into its tagged representation
pub fn encode(value: &NativeValue) -> Result<TaggedValue> {
    encode_at(value, "$")
}

/// Encode every value of a named attribute map
pub fn encode_map(values: &AttributeMap) -> Result<Item> {
    values
        .iter()
        .map(|(name, value)| Ok((name.clone(), encode_at(value, name)?)))
        .collect()
}

fn encode_at(value: &NativeValue, path: &str) -> Result<TaggedValue> {
    match value {
        NativeValue::String(s) => Ok(TaggedValue::S(s.clone())),
        NativeValue::Number(n) => n
            .to_decimal_string()
            .map(TaggedValue::N)
            .map_err(|e| with_path(e, path)),
        NativeValue::Bool(b) => Ok(TaggedValue::Bool(*b)),
        NativeValue::Null => Ok(TaggedValue::Null(true)),
        NativeValue::Bytes(b) => Ok(TaggedValue::B(b.clone())),
        NativeValue::Set(members) => encode_set(members, path),
        NativeValue::List(elements) => elements
            .iter()
            .enumerate()
            .map(|(i, element)| encode_at(element, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(TaggedValue::L),
        NativeValue::Map(entries) => entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), encode_at(v, &format!("{path}.{k}"))?)))
            .collect::<Result<HashMap<_, _>>>()
            .map(TaggedValue::M),
    }
}

fn encode_set(members: &[NativeValue], path: &str) -> Result<TaggedValue> {
    let Some(first) = members.first() else {
        return Err(MigrationError::unsupported_type(
            "empty set",
            format!("{path}: the store cannot hold an empty set"),
        ));
    };

    let kind = first.type_name();
    let homogeneous = members.iter().all(|m| {
        matches!(
            (first, m),
            (NativeValue::String(_), NativeValue::String(_))
                | (NativeValue::Number(_), NativeValue::Number(_))
                | (NativeValue::Bytes(_), NativeValue::Bytes(_))
        )
    });
    if !homogeneous {
        let mut kinds: Vec<&str> = members.iter().map(NativeValue::type_name).collect();
        kinds.sort_unstable();
        kinds.dedup();
        return Err(MigrationError::unsupported_type(
            format!("set<{}>", kinds.join("|")),
            format!("{path}: sets must contain only strings, only numbers or only bytes"),
        ));
    }

    match first {
        NativeValue::String(_) => {
            let mut out: Vec<String> = Vec::with_capacity(members.len());
            for m in members {
                if let NativeValue::String(s) = m {
                    if !out.contains(s) {
                        out.push(s.clone());
                    }
                }
            }
            Ok(TaggedValue::Ss(out))
        }
        NativeValue::Number(_) => {
            let mut out: Vec<String> = Vec::with_capacity(members.len());
            for m in members {
                if let NativeValue::Number(n) = m {
                    let rendered = n.to_decimal_string().map_err(|e| with_path(e, path))?;
                    if !out.contains(&rendered) {
                        out.push(rendered);
                    }
                }
            }
            Ok(TaggedValue::Ns(out))
        }
        NativeValue::Bytes(_) => {
            let mut out: Vec<Vec<u8>> = Vec::with_capacity(members.len());
            for m in members {
                if let NativeValue::Bytes(b) = m {
                    if !out.contains(b) {
                        out.push(b.clone());
                    }
                }
            }
            Ok(TaggedValue::Bs(out))
        }
        _ => Err(MigrationError::unsupported_type(
            format!("set<{kind}>"),
            format!("{path}: sets must contain only strings, only numbers or only bytes"),
        )),
    }
}

fn with_path(err: MigrationError, path: &str) -> MigrationError {
    match err {
        MigrationError::UnsupportedType { type_name, context } => {
            MigrationError::unsupported_type(type_name, format!("{path}: {context}"))
        }
        other => other,
    }
}

/// Decode a tagged value back into a native value
pub fn decode(value: &TaggedValue) -> Result<NativeValue> {
    decode_at(value, "$")
}

/// Decode every attribute of a stored item
pub fn decode_item(item: &Item) -> Result<AttributeMap> {
    item.iter()
        .map(|(k, v)| Ok((k.clone(), decode_at(v, k)?)))
        .collect()
}

fn decode_at(value: &TaggedValue, path: &str) -> Result<NativeValue> {
    match value {
        TaggedValue::S(s) => Ok(NativeValue::String(s.clone())),
        TaggedValue::N(n) => parse_number(n, path).map(NativeValue::Number),
        TaggedValue::Bool(b) => Ok(NativeValue::Bool(*b)),
        TaggedValue::Null(_) => Ok(NativeValue::Null),
        TaggedValue::B(b) => Ok(NativeValue::Bytes(b.clone())),
        TaggedValue::Ss(values) => Ok(NativeValue::Set(
            values.iter().cloned().map(NativeValue::String).collect(),
        )),
        TaggedValue::Ns(values) => values
            .iter()
            .map(|n| parse_number(n, path).map(NativeValue::Number))
            .collect::<Result<Vec<_>>>()
            .map(NativeValue::Set),
        TaggedValue::Bs(values) => Ok(NativeValue::Set(
            values.iter().cloned().map(NativeValue::Bytes).collect(),
        )),
        TaggedValue::L(values) => values
            .iter()
            .enumerate()
            .map(|(i, element)| decode_at(element, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(NativeValue::List),
        TaggedValue::M(entries) => entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), decode_at(v, &format!("{path}.{k}"))?)))
            .collect::<Result<HashMap<_, _>>>()
            .map(NativeValue::Map),
    }
}

fn parse_number(raw: &str, path: &str) -> Result<Number> {
    Number::parse(raw)
        .ok_or_else(|| MigrationError::decode(path, format!("'{raw}' is not a valid number")))
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_list {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&STANDARD.encode(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_encoding() {
        assert_eq!(encode(&"x".into()).unwrap(), TaggedValue::S("x".into()));
        assert_eq!(encode(&42i64.into()).unwrap(), TaggedValue::N("42".into()));
        assert_eq!(encode(&true.into()).unwrap(), TaggedValue::Bool(true));
        assert_eq!(encode(&NativeValue::Null).unwrap(), TaggedValue::Null(true));
        assert_eq!(
            encode(&NativeValue::bytes(vec![1u8, 2])).unwrap(),
            TaggedValue::B(vec![1, 2])
        );
    }

    #[test]
    fn test_numbers_render_without_exponent() {
        assert_eq!(encode(&1e20f64.into()).unwrap(), TaggedValue::N("100000000000000000000".into()));
        assert_eq!(encode(&3.0f64.into()).unwrap(), TaggedValue::N("3".into()));
        assert_eq!(encode(&0.25f64.into()).unwrap(), TaggedValue::N("0.25".into()));
        assert_eq!(encode(&(-0.0f64).into()).unwrap(), TaggedValue::N("0".into()));
        assert_eq!(encode(&u64::MAX.into()).unwrap(), TaggedValue::N(u64::MAX.to_string()));
    }

    #[test]
    fn test_non_finite_number_is_unsupported() {
        let err = encode(&NativeValue::List(vec![f64::NAN.into()])).unwrap_err();
        match err {
            MigrationError::UnsupportedType { type_name, context } => {
                assert_eq!(type_name, "non-finite number");
                assert!(context.starts_with("$[0]"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_homogeneous_sets() {
        let ss = NativeValue::string_set(["a", "b", "a"]);
        assert_eq!(encode(&ss).unwrap(), TaggedValue::Ss(vec!["a".into(), "b".into()]));

        let ns = NativeValue::Set(vec![1i64.into(), 2.5f64.into()]);
        assert_eq!(encode(&ns).unwrap(), TaggedValue::Ns(vec!["1".into(), "2.5".into()]));

        let bs = NativeValue::Set(vec![NativeValue::bytes(b"x".to_vec())]);
        assert_eq!(encode(&bs).unwrap(), TaggedValue::Bs(vec![b"x".to_vec()]));
    }

    #[test]
    fn test_heterogeneous_set_is_unsupported() {
        let mixed = NativeValue::Set(vec!["a".into(), 1i64.into()]);
        let err = encode(&mixed).unwrap_err();
        match err {
            MigrationError::UnsupportedType { type_name, .. } => {
                assert_eq!(type_name, "set<integer|string>");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sets_of_containers_and_empty_sets_are_unsupported() {
        let nested = NativeValue::Set(vec![NativeValue::List(vec![])]);
        assert!(matches!(encode(&nested), Err(MigrationError::UnsupportedType { .. })));
        assert!(matches!(
            encode(&NativeValue::Set(vec![])),
            Err(MigrationError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_nested_round_trip() {
        let value = NativeValue::from(json!({
            "identifier": "1",
            "count": 3,
            "ratio": 0.5,
            "tags": ["a", {"deep": [true, null]}],
        }));
        let tagged = encode(&value).unwrap();
        assert_eq!(decode(&tagged).unwrap(), value);
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert_eq!(Number::Int(3), Number::Float(3.0));
        assert_eq!(Number::Int(7), Number::UInt(7));
        assert_ne!(Number::Float(0.1), Number::Float(0.2));
    }

    #[test]
    fn test_invalid_stored_number_fails_to_decode() {
        let err = decode(&TaggedValue::N("12abc".into())).unwrap_err();
        assert!(matches!(err, MigrationError::Decode { .. }));
    }

    #[test]
    fn test_decode_error_names_attribute_path() {
        let item = Item::from([(
            "metrics".to_string(),
            TaggedValue::M(HashMap::from([(
                "counts".to_string(),
                TaggedValue::L(vec![TaggedValue::N("1".into()), TaggedValue::N("x1".into())]),
            )])),
        )]);
        match decode_item(&item).unwrap_err() {
            MigrationError::Decode { key, reason } => {
                assert_eq!(key, "metrics.counts[1]");
                assert!(reason.contains("x1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sets_compare_without_order_or_repeats() {
        let repeated = NativeValue::string_set(["a", "a"]);
        assert_eq!(decode(&encode(&repeated).unwrap()).unwrap(), repeated);

        let mixed_numbers = NativeValue::Set(vec![1i64.into(), 1.0f64.into()]);
        assert_eq!(decode(&encode(&mixed_numbers).unwrap()).unwrap(), mixed_numbers);

        let stored = decode(&TaggedValue::Ss(vec!["a".into(), "b".into()])).unwrap();
        assert_eq!(stored, NativeValue::string_set(["b", "a"]));
        assert_ne!(stored, NativeValue::string_set(["a", "c"]));
        assert_ne!(stored, NativeValue::List(vec!["a".into(), "b".into()]));
        assert_ne!(
            NativeValue::List(vec!["a".into(), "b".into()]),
            NativeValue::List(vec!["b".into(), "a".into()])
        );
    }

    #[test]
    fn test_wire_shape() {
        let tagged = TaggedValue::M(HashMap::from([(
            "b".to_string(),
            TaggedValue::B(b"hi".to_vec()),
        )]));
        let wire = serde_json::to_value(&tagged).unwrap();
        assert_eq!(wire, json!({"M": {"b": {"B": "aGk="}}}));
        let parsed: TaggedValue = serde_json::from_value(wire).unwrap();
        assert_eq!(parsed, tagged);
    }

    #[test]
    fn test_encode_map_reports_attribute_name() {
        let values = AttributeMap::from([(
            "tags".to_string(),
            NativeValue::Set(vec!["a".into(), true.into()]),
        )]);
        let err = encode_map(&values).unwrap_err();
        assert!(format!("{err}").contains("tags"));
    }
}
