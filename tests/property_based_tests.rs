mod common;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::*;
use proptest::prelude::*;
use registry_migrate::batch::{Batch, BatchIterator, BatchSink};
use registry_migrate::codec::payload::{compress, decode_item_payload, decompress, is_compressed};
use registry_migrate::codec::{decode, encode, NativeValue, TaggedValue};
use registry_migrate::error::MigrationError;
use serde_json::json;

#[derive(Default)]
struct CountingSink {
    sizes: Vec<usize>,
}

#[async_trait]
impl BatchSink for CountingSink {
    async fn on_batch(&mut self, batch: Batch) -> registry_migrate::Result<()> {
        self.sizes.push(batch.len());
        Ok(())
    }
}

proptest! {
    /// Property: Compressed payloads inflate back to the same document
    #[test]
    fn payload_round_trips_through_deflate(doc in json_document_strategy()) {
        let raw = compress(&doc).unwrap();
        prop_assert!(is_compressed(&raw));
        prop_assert_eq!(decompress(&raw).unwrap(), doc);
    }

    /// Property: Every stored payload form decodes to the same document
    #[test]
    fn payload_decodes_from_every_stored_form(doc in json_document_strategy()) {
        let raw = compress(&doc).unwrap();
        let plain = serde_json::to_vec(&doc).unwrap();

        let binary = decode_item_payload(&TaggedValue::B(raw.clone()), "k").unwrap();
        let legacy = decode_item_payload(&TaggedValue::B(plain.clone()), "k").unwrap();
        let text = decode_item_payload(&TaggedValue::S(STANDARD.encode(&raw)), "k").unwrap();
        prop_assert_eq!(&binary, &doc);
        prop_assert_eq!(&legacy, &doc);
        prop_assert_eq!(&text, &doc);
    }

    /// Property: Encodable values decode back to an equal value
    #[test]
    fn attribute_values_round_trip(value in native_value_strategy()) {
        let tagged = encode(&value).unwrap();
        prop_assert_eq!(decode(&tagged).unwrap(), value);
    }

    /// Property: A set mixing strings and numbers is rejected wherever it sits
    #[test]
    fn mixed_sets_are_never_coerced(
        text in "[a-z]{1,8}",
        number in any::<i64>(),
        depth in 0usize..4,
    ) {
        let mut value = NativeValue::Set(vec![NativeValue::from(text), NativeValue::from(number)]);
        for _ in 0..depth {
            value = NativeValue::List(vec![NativeValue::Null, value]);
        }
        match encode(&value) {
            Err(MigrationError::UnsupportedType { type_name, .. }) => {
                prop_assert_eq!(type_name, "set<integer|string>");
            }
            other => prop_assert!(false, "expected UnsupportedType, got {:?}", other),
        }
    }

    /// Property: A scan over N items in pages of P yields ceil(N/P) batches holding all N
    #[test]
    fn scan_batches_cover_the_table(n in 0usize..40, p in 1u32..10) {
        let store = resource_store();
        for i in 0..n {
            put_resource(&store, &format!("{i:03}"), &json!({"identifier": i}));
        }

        let mut sink = CountingSink::default();
        let totals = tokio_test::block_on(
            BatchIterator::new(store).scan(&resources_table(), None, p, &mut sink),
        )
        .unwrap();

        prop_assert_eq!(totals.batches, n.div_ceil(p as usize));
        prop_assert_eq!(sink.sizes.iter().sum::<usize>(), n);
        prop_assert!(sink.sizes.iter().all(|size| *size > 0 && *size <= p as usize));
    }
}
