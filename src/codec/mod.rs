//! # Codecs
//!
//! Translation between native values and the store's item representation:
//!
//! - [`attribute`]: native values to and from tagged attribute values
//! - [`payload`]: the raw DEFLATE JSON document carried in each item
//! - [`export`]: stored items to plain JSON for batch output

pub mod attribute;
pub mod export;
pub mod payload;

pub use attribute::{decode, decode_item, encode, encode_map, AttributeMap, Item, NativeValue, Number, TaggedValue};
pub use export::item_to_json;
pub use payload::{compress, decode_item_payload, decompress, encode_item_payload, is_compressed};
