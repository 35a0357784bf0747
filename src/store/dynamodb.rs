//! # DynamoDB Store Adapter
//!
//! Production [`StoreClient`] over `aws-sdk-dynamodb`. The client is built from
//! an injected `SdkConfig` (credentials and session acquisition stay with the
//! caller) plus optional region, endpoint and timeout overrides, and translates
//! between the crate's [`TaggedValue`] and the SDK's `AttributeValue`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeValue, KeyType, ReturnConsumedCapacity, TransactWriteItem, Update,
};
use aws_sdk_dynamodb::Client;
use aws_smithy_types::timeout::TimeoutConfig;
use tracing::{debug, warn};

use crate::codec::attribute::{Item, TaggedValue};
use crate::error::{MigrationError, Result};
use crate::store::{
    ExpressionBuilder, MutationStatement, PageResponse, QueryRequest, ScanRequest, StoreClient,
    TableDescriptor, TableInfo, TableNamePage,
};

/// Client overrides applied on top of the shared SDK configuration
#[derive(Debug, Clone, Default)]
pub struct DynamoDbStoreConfig {
    /// AWS region (uses the SDK default if not specified)
    pub region: Option<String>,
    /// Endpoint override (e.g. a local emulator)
    pub endpoint: Option<String>,
    /// Per-operation timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Store client backed by DynamoDB
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
}

impl std::fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbStore").finish_non_exhaustive()
    }
}

impl DynamoDbStore {
    /// Build a client inheriting HTTP, retry and credential settings from
    /// `sdk_config`, then apply `config` overrides
    pub fn new(sdk_config: &aws_config::SdkConfig, config: DynamoDbStoreConfig) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);

        if let Some(region) = config.region {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region));
        }

        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let Some(timeout_ms) = config.timeout_ms {
            let timeout_config = TimeoutConfig::builder()
                .operation_timeout(Duration::from_millis(timeout_ms))
                .build();
            builder = builder.timeout_config(timeout_config);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Wrap a pre-built client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn store_error<E, R>(operation: &str, err: SdkError<E, R>) -> MigrationError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    MigrationError::store(operation, format!("{}", DisplayErrorContext(&err)))
}

/// Convert a crate value into the SDK representation
pub fn to_attribute_value(value: &TaggedValue) -> AttributeValue {
    match value {
        TaggedValue::S(s) => AttributeValue::S(s.clone()),
        TaggedValue::N(n) => AttributeValue::N(n.clone()),
        TaggedValue::Bool(b) => AttributeValue::Bool(*b),
        TaggedValue::Null(b) => AttributeValue::Null(*b),
        TaggedValue::B(b) => AttributeValue::B(Blob::new(b.clone())),
        TaggedValue::Ss(v) => AttributeValue::Ss(v.clone()),
        TaggedValue::Ns(v) => AttributeValue::Ns(v.clone()),
        TaggedValue::Bs(v) => AttributeValue::Bs(v.iter().map(|b| Blob::new(b.clone())).collect()),
        TaggedValue::L(v) => AttributeValue::L(v.iter().map(to_attribute_value).collect()),
        TaggedValue::M(m) => AttributeValue::M(to_sdk_item(m)),
    }
}

/// Convert an SDK value into the crate representation
pub fn from_attribute_value(value: &AttributeValue) -> Result<TaggedValue> {
    Ok(match value {
        AttributeValue::S(s) => TaggedValue::S(s.clone()),
        AttributeValue::N(n) => TaggedValue::N(n.clone()),
        AttributeValue::Bool(b) => TaggedValue::Bool(*b),
        AttributeValue::Null(b) => TaggedValue::Null(*b),
        AttributeValue::B(b) => TaggedValue::B(b.as_ref().to_vec()),
        AttributeValue::Ss(v) => TaggedValue::Ss(v.clone()),
        AttributeValue::Ns(v) => TaggedValue::Ns(v.clone()),
        AttributeValue::Bs(v) => TaggedValue::Bs(v.iter().map(|b| b.as_ref().to_vec()).collect()),
        AttributeValue::L(v) => {
            TaggedValue::L(v.iter().map(from_attribute_value).collect::<Result<Vec<_>>>()?)
        }
        AttributeValue::M(m) => TaggedValue::M(from_sdk_item(m)?),
        other => {
            return Err(MigrationError::unsupported_type(
                format!("{other:?}"),
                "attribute value kind unknown to this client",
            ))
        }
    })
}

fn to_sdk_item(item: &Item) -> HashMap<String, AttributeValue> {
    item.iter()
        .map(|(k, v)| (k.clone(), to_attribute_value(v)))
        .collect()
}

fn from_sdk_item(item: &HashMap<String, AttributeValue>) -> Result<Item> {
    item.iter()
        .map(|(k, v)| Ok((k.clone(), from_attribute_value(v)?)))
        .collect()
}

fn non_empty<K, V>(map: HashMap<K, V>) -> Option<HashMap<K, V>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

#[async_trait]
impl StoreClient for DynamoDbStore {
    async fn list_tables(&self, exclusive_start_table_name: Option<String>) -> Result<TableNamePage> {
        let response = self
            .client
            .list_tables()
            .set_exclusive_start_table_name(exclusive_start_table_name)
            .send()
            .await
            .map_err(|e| store_error("list_tables", e))?;

        Ok(TableNamePage {
            names: response.table_names().to_vec(),
            last_evaluated_table_name: response.last_evaluated_table_name().map(str::to_string),
        })
    }

    async fn describe_table(&self, name: &str) -> Result<TableInfo> {
        let response = self
            .client
            .describe_table()
            .table_name(name)
            .send()
            .await
            .map_err(|e| store_error("describe_table", e))?;

        let table = response
            .table()
            .ok_or_else(|| MigrationError::not_found(format!("description of table {name}")))?;

        let mut partition_key = None;
        let mut sort_key = None;
        for element in table.key_schema() {
            match element.key_type() {
                KeyType::Hash => partition_key = Some(element.attribute_name().to_string()),
                KeyType::Range => sort_key = Some(element.attribute_name().to_string()),
                other => warn!(table = name, key_type = ?other, "⚠️ DYNAMODB: Unknown key type in schema"),
            }
        }
        let partition_key = partition_key.ok_or_else(|| {
            MigrationError::not_found(format!("partition key in schema of table {name}"))
        })?;

        Ok(TableInfo {
            descriptor: TableDescriptor {
                name: name.to_string(),
                partition_key,
                sort_key,
            },
            item_count: table.item_count(),
            status: table.table_status().map(|s| s.as_str().to_string()),
            indexes: table
                .global_secondary_indexes()
                .iter()
                .filter_map(|index| index.index_name().map(str::to_string))
                .collect(),
        })
    }

    async fn scan_page(&self, request: &ScanRequest) -> Result<PageResponse> {
        let mut builder = ExpressionBuilder::new();
        let filter_expression = request.filter.as_ref().and_then(|f| f.render(&mut builder));
        let (names, values) = builder.into_parts();

        let response = self
            .client
            .scan()
            .table_name(&request.table)
            .set_limit(request.limit.map(|l| l.min(i32::MAX as u32) as i32))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .set_exclusive_start_key(request.exclusive_start_key.as_ref().map(to_sdk_item))
            .set_filter_expression(filter_expression)
            .set_expression_attribute_names(non_empty(names))
            .set_expression_attribute_values(non_empty(to_sdk_item(&values)))
            .send()
            .await
            .map_err(|e| store_error("scan", e))?;

        let items = response
            .items()
            .iter()
            .map(from_sdk_item)
            .collect::<Result<Vec<_>>>()?;
        let last_evaluated_key = response
            .last_evaluated_key()
            .filter(|k| !k.is_empty())
            .map(from_sdk_item)
            .transpose()?;
        let consumed_capacity = response
            .consumed_capacity()
            .and_then(|c| c.capacity_units())
            .unwrap_or(0.0);

        debug!(
            table = %request.table,
            items = items.len(),
            consumed_capacity,
            "🛰️ DYNAMODB: Scan page received"
        );
        Ok(PageResponse {
            items,
            last_evaluated_key,
            consumed_capacity,
        })
    }

    async fn query_page(&self, request: &QueryRequest) -> Result<PageResponse> {
        let mut builder = ExpressionBuilder::new();
        let key_expression = request.key_condition.render(&mut builder);
        let filter_expression = request.filter.as_ref().and_then(|f| f.render(&mut builder));
        let (names, values) = builder.into_parts();

        let response = self
            .client
            .query()
            .table_name(&request.table)
            .set_index_name(request.index.clone())
            .key_condition_expression(key_expression)
            .set_filter_expression(filter_expression)
            .set_limit(request.limit.map(|l| l.min(i32::MAX as u32) as i32))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .set_exclusive_start_key(request.exclusive_start_key.as_ref().map(to_sdk_item))
            .set_expression_attribute_names(non_empty(names))
            .set_expression_attribute_values(non_empty(to_sdk_item(&values)))
            .send()
            .await
            .map_err(|e| store_error("query", e))?;

        let items = response
            .items()
            .iter()
            .map(from_sdk_item)
            .collect::<Result<Vec<_>>>()?;
        let last_evaluated_key = response
            .last_evaluated_key()
            .filter(|k| !k.is_empty())
            .map(from_sdk_item)
            .transpose()?;

        Ok(PageResponse {
            items,
            last_evaluated_key,
            consumed_capacity: response
                .consumed_capacity()
                .and_then(|c| c.capacity_units())
                .unwrap_or(0.0),
        })
    }

    async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>> {
        let response = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(to_sdk_item(key)))
            .send()
            .await
            .map_err(|e| store_error("get_item", e))?;

        response.item().map(from_sdk_item).transpose()
    }

    async fn transact_write(&self, statements: &[MutationStatement]) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = statements.iter().map(MutationStatement::describe_key).collect();

        let items = statements
            .iter()
            .map(|statement| {
                let update = Update::builder()
                    .table_name(&statement.table)
                    .set_key(Some(to_sdk_item(&statement.key)))
                    .update_expression(&statement.update_expression)
                    .set_expression_attribute_names(non_empty(
                        statement.expression_attribute_names.clone(),
                    ))
                    .set_expression_attribute_values(non_empty(to_sdk_item(
                        &statement.expression_attribute_values,
                    )))
                    .build()
                    .map_err(|e| {
                        MigrationError::transaction_failed(keys.clone(), format!("invalid statement: {e}"))
                    })?;
                Ok(TransactWriteItem::builder().update(update).build())
            })
            .collect::<Result<Vec<_>>>()?;

        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(service_err)) => match service_err.err() {
                TransactWriteItemsError::TransactionCanceledException(cancelled) => {
                    let reasons: Vec<String> = cancelled
                        .cancellation_reasons()
                        .iter()
                        .map(|r| r.code().unwrap_or("None").to_string())
                        .collect();
                    Err(MigrationError::transaction_failed(
                        keys,
                        format!(
                            "TransactionCanceledException: cancellation reasons [{}]: {}",
                            reasons.join(", "),
                            cancelled.message().unwrap_or_default()
                        ),
                    ))
                }
                other => Err(MigrationError::transaction_failed(keys, other.to_string())),
            },
            Err(e) => Err(store_error("transact_write", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversion_round_trip() {
        let value = TaggedValue::M(HashMap::from([
            ("s".to_string(), TaggedValue::S("x".into())),
            ("n".to_string(), TaggedValue::N("1.5".into())),
            ("b".to_string(), TaggedValue::B(vec![0, 1])),
            ("bs".to_string(), TaggedValue::Bs(vec![vec![2]])),
            (
                "l".to_string(),
                TaggedValue::L(vec![TaggedValue::Null(true), TaggedValue::Bool(false)]),
            ),
            ("ss".to_string(), TaggedValue::Ss(vec!["a".into()])),
        ]));
        let sdk = to_attribute_value(&value);
        assert_eq!(from_attribute_value(&sdk).unwrap(), value);
    }

    #[test]
    fn test_empty_expression_tables_are_omitted() {
        assert!(non_empty(HashMap::<String, String>::new()).is_none());
        assert!(non_empty(HashMap::from([("#n0".to_string(), "PK0".to_string())])).is_some());
    }
}
