//! # Payload Codec
//!
//! The resource document travels inside each item's payload attribute as UTF-8
//! JSON compressed with raw DEFLATE (no zlib or gzip container). Older,
//! unmigrated items may carry the document uncompressed, either as bytes or as
//! text, so [`decode_item_payload`] accepts every form the table has held.

use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde_json::Value;

use crate::codec::attribute::TaggedValue;
use crate::error::{MigrationError, Result};

/// Serialize a document to compact JSON and compress it as raw DEFLATE
pub fn compress(doc: &Value) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(doc)?;
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| MigrationError::serialization(format!("deflate failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| MigrationError::serialization(format!("deflate failed: {e}")))
}

/// Inflate a raw DEFLATE stream and parse the JSON it contains
pub fn decompress(raw: &[u8]) -> Result<Value> {
    let text = inflate(raw)?;
    serde_json::from_slice(&text)
        .map_err(|e| MigrationError::decode("payload", format!("invalid JSON after inflate: {e}")))
}

/// Whether `raw` is a valid raw DEFLATE stream
pub fn is_compressed(raw: &[u8]) -> bool {
    !raw.is_empty() && inflate(raw).is_ok()
}

/// Inflate a complete raw DEFLATE stream; a stream that ends before its final
/// block is an error, not a short read.
fn inflate(raw: &[u8]) -> Result<Vec<u8>> {
    let mut inflater = Decompress::new(false);
    let mut out: Vec<u8> = Vec::with_capacity(raw.len().saturating_mul(4).max(64));
    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity());
        }
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();
        let status = inflater
            .decompress_vec(&raw[consumed..], &mut out, FlushDecompress::Finish)
            .map_err(|e| MigrationError::decode("payload", format!("invalid deflate stream: {e}")))?;
        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                let progressed =
                    inflater.total_in() as usize > consumed || inflater.total_out() > produced;
                if !progressed {
                    return Err(MigrationError::decode(
                        "payload",
                        "incomplete or truncated deflate stream",
                    ));
                }
            }
        }
    }
}

/// Decode a payload attribute in any of its stored forms
///
/// * binary: compressed, or plain JSON bytes
/// * string: base64 of compressed bytes, or plain JSON text
///
/// `key` names the item in error messages.
pub fn decode_item_payload(value: &TaggedValue, key: &str) -> Result<Value> {
    let with_key = |err: MigrationError| match err {
        MigrationError::Decode { reason, .. } => MigrationError::decode(key, reason),
        other => other,
    };
    match value {
        TaggedValue::B(bytes) => match decompress(bytes) {
            Ok(doc) => Ok(doc),
            Err(inflate_err) => serde_json::from_slice(bytes).map_err(|json_err| {
                MigrationError::decode(
                    key,
                    format!("payload is neither deflated ({inflate_err}) nor JSON ({json_err})"),
                )
            }),
        },
        TaggedValue::S(text) => {
            if let Ok(bytes) = STANDARD.decode(text.trim()) {
                if is_compressed(&bytes) {
                    return decompress(&bytes).map_err(with_key);
                }
            }
            serde_json::from_str(text).map_err(|e| {
                MigrationError::decode(key, format!("payload is neither base64 deflate nor JSON: {e}"))
            })
        }
        other => Err(MigrationError::decode(
            key,
            format!("payload attribute has type {}, expected B or S", other.type_tag()),
        )),
    }
}

/// Encode a document into the binary payload attribute form
pub fn encode_item_payload(doc: &Value) -> Result<TaggedValue> {
    compress(doc).map(TaggedValue::B)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let doc = json!({"identifier": "1", "title": "X", "n": [1, 2.5, null]});
        let packed = compress(&doc).unwrap();
        assert!(is_compressed(&packed));
        assert_eq!(decompress(&packed).unwrap(), doc);
    }

    #[test]
    fn test_raw_deflate_framing_has_no_zlib_header() {
        let packed = compress(&json!({"a": 1})).unwrap();
        // zlib streams start with 0x78
        assert_ne!(packed[0], 0x78);

        let mut zlib = flate2::write::ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(br#"{"a":1}"#).unwrap();
        let zlib = zlib.finish().unwrap();
        assert!(decompress(&zlib).is_err());
    }

    #[test]
    fn test_interop_with_independent_deflater() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::best());
        enc.write_all(br#"{"title":"Y"}"#).unwrap();
        let raw = enc.finish().unwrap();
        assert_eq!(decompress(&raw).unwrap(), json!({"title": "Y"}));
    }

    #[test]
    fn test_plain_json_is_not_compressed() {
        assert!(!is_compressed(br#"{"plain": true}"#));
        assert!(!is_compressed(b""));
    }

    #[test]
    fn test_decode_item_payload_forms() {
        let doc = json!({"identifier": "7"});
        let packed = compress(&doc).unwrap();

        let binary = TaggedValue::B(packed.clone());
        assert_eq!(decode_item_payload(&binary, "k").unwrap(), doc);

        let plain_bytes = TaggedValue::B(serde_json::to_vec(&doc).unwrap());
        assert_eq!(decode_item_payload(&plain_bytes, "k").unwrap(), doc);

        let b64 = TaggedValue::S(STANDARD.encode(&packed));
        assert_eq!(decode_item_payload(&b64, "k").unwrap(), doc);

        let text = TaggedValue::S(doc.to_string());
        assert_eq!(decode_item_payload(&text, "k").unwrap(), doc);
    }

    #[test]
    fn test_decode_failure_names_the_item() {
        let err = decode_item_payload(&TaggedValue::B(vec![0xff, 0x00, 0x13]), "PK0=Resource:9")
            .unwrap_err();
        match err {
            MigrationError::Decode { key, .. } => assert_eq!(key, "PK0=Resource:9"),
            other => panic!("unexpected error: {other}"),
        }

        let err = decode_item_payload(&TaggedValue::Bool(true), "PK0=x").unwrap_err();
        assert!(format!("{err}").contains("BOOL"));
    }
}
