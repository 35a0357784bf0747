//! # Store Client
//!
//! The narrow slice of the wide-column store the migrations need: table
//! listing and description, paginated scan and query, point reads and
//! all-or-nothing transactional updates. Request and response shapes mirror
//! the store's native ones so a production adapter is a thin translation.
//!
//! Components receive an `Arc<dyn StoreClient>` at construction; there is no
//! process-wide client.

pub mod dynamodb;
pub mod expression;
pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::codec::attribute::{Item, TaggedValue};
use crate::error::{MigrationError, Result};

pub use dynamodb::{DynamoDbStore, DynamoDbStoreConfig};
pub use expression::{Condition, ExpressionBuilder, Filter, KeyCondition, Operator, SortCondition};
pub use memory::InMemoryStore;

/// Shared handle to a store client
pub type SharedStore = Arc<dyn StoreClient>;

/// Resolved identity of a table: name and primary key schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl TableDescriptor {
    pub fn new(
        name: impl Into<String>,
        partition_key: impl Into<String>,
        sort_key: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: sort_key.map(str::to_string),
        }
    }

    /// Names of the primary key attributes
    pub fn key_attributes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.as_str()).chain(self.sort_key.as_deref())
    }

    /// Extract the primary key of `item`
    pub fn key_of(&self, item: &Item) -> Result<Item> {
        self.key_attributes()
            .map(|attr| {
                item.get(attr)
                    .map(|v| (attr.to_string(), v.clone()))
                    .ok_or_else(|| {
                        MigrationError::not_found(format!(
                            "key attribute {attr} on item in table {}",
                            self.name
                        ))
                    })
            })
            .collect()
    }

    /// Render the primary key of `item` for messages (`PK0=Resource:1, SK0=...`)
    pub fn describe_key(&self, item: &Item) -> String {
        self.key_attributes()
            .map(|attr| format!("{attr}={}", item.get(attr).map(render_key_value).unwrap_or_default()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sort_key {
            Some(sort) => write!(f, "{} ({}, {})", self.name, self.partition_key, sort),
            None => write!(f, "{} ({})", self.name, self.partition_key),
        }
    }
}

/// Render a key value compactly for log and error messages
pub fn render_key_value(value: &TaggedValue) -> String {
    match value {
        TaggedValue::S(s) | TaggedValue::N(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.type_tag().to_string()),
    }
}

/// Render any key map for messages, attributes sorted by name
pub fn render_key(key: &Item) -> String {
    let mut parts: Vec<String> = key
        .iter()
        .map(|(k, v)| format!("{k}={}", render_key_value(v)))
        .collect();
    parts.sort();
    parts.join(", ")
}

/// Table metadata beyond the key schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub descriptor: TableDescriptor,
    pub item_count: Option<i64>,
    pub status: Option<String>,
    pub indexes: Vec<String>,
}

/// One page of table names
#[derive(Debug, Clone, Default)]
pub struct TableNamePage {
    pub names: Vec<String>,
    pub last_evaluated_table_name: Option<String>,
}

/// A single scan round trip
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub table: String,
    pub filter: Option<Filter>,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<Item>,
}

/// A single query round trip
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    pub index: Option<String>,
    pub key_condition: KeyCondition,
    pub filter: Option<Filter>,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<Item>,
}

/// Items of one page plus the continuation token and capacity consumed
#[derive(Debug, Clone, Default)]
pub struct PageResponse {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
    pub consumed_capacity: f64,
}

/// A single-item conditionless update addressed by primary key
///
/// Attribute names and values are referenced from `update_expression` through
/// placeholders resolved by `expression_attribute_names` and
/// `expression_attribute_values`.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationStatement {
    pub table: String,
    pub key: Item,
    pub update_expression: String,
    pub expression_attribute_names: HashMap<String, String>,
    pub expression_attribute_values: Item,
}

impl MutationStatement {
    /// Attribute names this statement sets, resolved through the alias table
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .expression_attribute_names
            .values()
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    pub fn describe_key(&self) -> String {
        format!("{}[{}]", self.table, render_key(&self.key))
    }
}

/// Operations the migrations require from the store
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// One page of table names visible to the active credentials
    async fn list_tables(&self, exclusive_start_table_name: Option<String>) -> Result<TableNamePage>;

    /// Key schema and metadata of a table
    async fn describe_table(&self, name: &str) -> Result<TableInfo>;

    async fn scan_page(&self, request: &ScanRequest) -> Result<PageResponse>;

    async fn query_page(&self, request: &QueryRequest) -> Result<PageResponse>;

    async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>>;

    /// Apply every statement or none of them
    ///
    /// A store-side rejection is reported as [`MigrationError::TransactionFailed`]
    /// naming every key in the batch.
    async fn transact_write(&self, statements: &[MutationStatement]) -> Result<()>;
}
