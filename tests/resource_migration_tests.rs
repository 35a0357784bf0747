mod common;

use async_trait::async_trait;
use common::*;
use registry_migrate::batch::{Batch, BatchIterator, BatchSink, BatchTotals};
use registry_migrate::codec::{AttributeMap, NativeValue};
use registry_migrate::constants::resource_key;
use registry_migrate::error::{MigrationError, Result};
use registry_migrate::mutation::resource_primary_key;
use registry_migrate::resolver::{TablePattern, TableResolver};
use registry_migrate::store::{Condition, Filter, KeyCondition, SharedStore};
use registry_migrate::TaggedValue;
use serde_json::{json, Value};

/// Keeps every decoded payload, in delivery order
#[derive(Default)]
struct Payloads {
    batches: Vec<usize>,
    payloads: Vec<Value>,
}

#[async_trait]
impl BatchSink for Payloads {
    async fn on_batch(&mut self, batch: Batch) -> Result<()> {
        self.batches.push(batch.len());
        self.payloads
            .extend(batch.items.into_iter().filter_map(|item| item.payload));
        Ok(())
    }
}

async fn scan_all(store: SharedStore, page_size: u32) -> (Payloads, BatchTotals) {
    let mut sink = Payloads::default();
    let totals = BatchIterator::new(store)
        .scan(&resources_table(), None, page_size, &mut sink)
        .await
        .unwrap();
    (sink, totals)
}

#[tokio::test]
async fn test_scan_update_rescan_scenario() {
    let store = resource_store();
    put_resource(&store, "1", &json!({"identifier": "1", "title": "X"}));

    let (before, _) = scan_all(store.clone(), 10).await;
    assert_eq!(before.payloads.len(), 1);
    assert_eq!(before.payloads[0]["title"], "X");

    let mutator = mutator(store.clone());
    let found = mutator.find_by_identifier("1").await.unwrap().unwrap();
    let mut payload = found.payload.unwrap();
    payload["title"] = json!("Y");
    let statement = mutator
        .build_payload_update(&found.key, &payload, AttributeMap::new())
        .unwrap();
    mutator.execute(vec![statement]).await.unwrap();

    let (after, _) = scan_all(store, 10).await;
    assert_eq!(after.payloads.len(), 1);
    assert_eq!(after.payloads[0]["title"], "Y");
}

#[tokio::test]
async fn test_scan_terminates_after_ceil_n_over_p_batches() {
    for (n, p) in [(10usize, 3u32), (9, 3), (1, 700), (25, 1)] {
        let store = resource_store();
        for i in 0..n {
            put_resource(&store, &format!("{i:04}"), &json!({"identifier": i}));
        }

        let (sink, totals) = scan_all(store, p).await;
        let expected = n.div_ceil(p as usize);
        assert_eq!(totals.batches, expected, "n={n} p={p}");
        assert_eq!(sink.batches.len(), expected);
        assert_eq!(sink.batches.iter().sum::<usize>(), n);
        assert_eq!(totals.items, n);
        assert!(totals.consumed_capacity > 0.0);
    }
}

#[tokio::test]
async fn test_filtered_scan_and_index_query() {
    let store = resource_store();
    for i in 0..6 {
        let mut item = resource_item(&i.to_string(), &json!({"identifier": i.to_string()}));
        if i % 2 == 0 {
            item.insert("status".to_string(), TaggedValue::S("PUBLISHED".into()));
        }
        store.put_item(RESOURCES_TABLE, item).unwrap();
    }

    let mut sink = Payloads::default();
    let filter = Filter::parse_all(&["status:eq:PUBLISHED"]).unwrap();
    let totals = BatchIterator::new(store.clone())
        .scan(&resources_table(), Some(filter), 2, &mut sink)
        .await
        .unwrap();
    assert_eq!(totals.items, 3);
    for payload in &sink.payloads {
        let identifier: u32 = payload["identifier"].as_str().unwrap().parse().unwrap();
        assert_eq!(identifier % 2, 0);
    }

    let mut sink = Payloads::default();
    let key = KeyCondition::partition_eq("PK3", TaggedValue::S(resource_key("4")))
        .and_sort_eq("SK3", TaggedValue::S(resource_key("4")));
    BatchIterator::new(store.clone())
        .query(&resources_table(), Some("ResourcesByIdentifier"), key, 700, &mut sink)
        .await
        .unwrap();
    assert_eq!(sink.payloads, vec![json!({"identifier": "4"})]);

    let mut sink = Payloads::default();
    let unpublished = Filter::new(vec![Condition::not_exists("status")]);
    let totals = BatchIterator::new(store)
        .scan(&resources_table(), Some(unpublished), 700, &mut sink)
        .await
        .unwrap();
    assert_eq!(totals.items, 3);
}

#[tokio::test]
async fn test_failed_statement_aborts_whole_batch() {
    let store = resource_store();
    for id in ["1", "2", "3"] {
        put_resource(&store, id, &json!({"identifier": id, "title": "X"}));
    }
    let before = store.items(RESOURCES_TABLE);
    let mutator = mutator(store.clone());
    let table = resources_table();

    let title = |t: &str| AttributeMap::from([("title".to_string(), NativeValue::from(t))]);
    let mixed_set = AttributeMap::from([(
        "tags".to_string(),
        NativeValue::Set(vec![NativeValue::from("a"), NativeValue::from(1i64)]),
    )]);
    let updates = vec![
        (resource_primary_key(&table, "1"), title("Y")),
        (resource_primary_key(&table, "2"), mixed_set),
        (resource_primary_key(&table, "3"), title("Y")),
    ];

    let err = mutator.execute_updates(&updates).await.unwrap_err();
    match &err {
        MigrationError::TransactionFailed { keys, reason } => {
            assert_eq!(keys.len(), 3);
            assert!(reason.contains("set<"), "reason: {reason}");
        }
        other => panic!("expected TransactionFailed, got {other:?}"),
    }
    assert_eq!(store.transaction_count(), 0);

    let mut after = store.items(RESOURCES_TABLE);
    let mut before = before;
    let by_key = |i: &registry_migrate::Item| i["PK0"].as_s().unwrap().to_string();
    before.sort_by_key(by_key);
    after.sort_by_key(by_key);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_store_rejection_applies_nothing() {
    let store = resource_store();
    for id in ["1", "2"] {
        put_resource(&store, id, &json!({"identifier": id}));
    }
    let mutator = mutator(store.clone());
    let table = resources_table();
    store.inject_transaction_failures(1, "ConditionalCheckFailed");

    let attrs = AttributeMap::from([("title".to_string(), NativeValue::from("Y"))]);
    let statements = vec![
        mutator.build_update(&resource_primary_key(&table, "1"), &attrs).unwrap(),
        mutator.build_update(&resource_primary_key(&table, "2"), &attrs).unwrap(),
    ];
    let err = mutator.execute(statements).await.unwrap_err();
    assert!(matches!(err, MigrationError::TransactionFailed { .. }));
    assert!(store
        .items(RESOURCES_TABLE)
        .iter()
        .all(|item| !item.contains_key("title")));
}

#[tokio::test]
async fn test_table_resolution() {
    let store = store_with_tables(&["a-dev", "a-prod", "b-dev"]);
    let resolver = TableResolver::new(store);

    match resolver.resolve_exact_or_substring("a-").await {
        Err(MigrationError::Ambiguous { pattern, candidates }) => {
            assert_eq!(pattern, "a-");
            assert_eq!(candidates, vec!["a-dev".to_string(), "a-prod".to_string()]);
        }
        other => panic!("expected Ambiguous, got {other:?}"),
    }

    let table = resolver.resolve_exact_or_substring("b-").await.unwrap();
    assert_eq!(table.name, "b-dev");
    assert_eq!(table.partition_key, "PK0");

    let err = resolver.resolve_exact_or_substring("z-").await.unwrap_err();
    assert!(matches!(err, MigrationError::NotFound { .. }));

    let table = resolver
        .resolve(&TablePattern::regex("a-p.*").unwrap())
        .await
        .unwrap();
    assert_eq!(table.name, "a-prod");
}

#[tokio::test]
async fn test_mid_scan_failure_reports_last_batch() {
    let store = resource_store();
    for i in 0..10 {
        put_resource(&store, &format!("{i:02}"), &json!({"identifier": i}));
    }
    store.inject_page_failures(2, 1, "ServiceUnavailable");

    let mut sink = Payloads::default();
    let err = BatchIterator::new(store)
        .scan(&resources_table(), None, 3, &mut sink)
        .await
        .unwrap_err();
    assert_eq!(err.last_completed_batch(), Some(1));
    assert_eq!(sink.batches, vec![3, 3]);
}
