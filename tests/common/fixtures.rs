//! Store fixtures shared by the integration tests.

use std::sync::Arc;

use registry_migrate::codec::payload::compress;
use registry_migrate::codec::{Item, TaggedValue};
use registry_migrate::config::MutationConfig;
use registry_migrate::constants::resource_key;
use registry_migrate::mutation::ResourceMutator;
use registry_migrate::store::{InMemoryStore, SharedStore, TableDescriptor};
use serde_json::Value;

pub const RESOURCES_TABLE: &str = "nva-resources-prod";

pub fn resources_table() -> TableDescriptor {
    TableDescriptor::new(RESOURCES_TABLE, "PK0", Some("SK0"))
}

/// An empty resources table with the identifier index
pub fn resource_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.create_table(resources_table());
    store
        .create_index(RESOURCES_TABLE, "ResourcesByIdentifier", "PK3", Some("SK3"))
        .expect("index on existing table");
    store
}

/// A resource item keyed `Resource:{identifier}` on primary and index keys
pub fn resource_item(identifier: &str, payload: &Value) -> Item {
    let key = resource_key(identifier);
    Item::from([
        ("PK0".to_string(), TaggedValue::S(key.clone())),
        ("SK0".to_string(), TaggedValue::S(key.clone())),
        ("PK3".to_string(), TaggedValue::S(key.clone())),
        ("SK3".to_string(), TaggedValue::S(key)),
        (
            "data".to_string(),
            TaggedValue::B(compress(payload).expect("payload compresses")),
        ),
    ])
}

pub fn put_resource(store: &InMemoryStore, identifier: &str, payload: &Value) {
    store
        .put_item(RESOURCES_TABLE, resource_item(identifier, payload))
        .expect("item fits the store");
}

pub fn mutator(store: Arc<InMemoryStore>) -> ResourceMutator {
    let shared: SharedStore = store;
    ResourceMutator::new(shared, resources_table(), MutationConfig::default())
}

/// Store holding only empty tables with the given names
pub fn store_with_tables(names: &[&str]) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new().with_table_name_page(2));
    for name in names {
        store.create_table(TableDescriptor::new(*name, "PK0", Some("SK0")));
    }
    store
}
