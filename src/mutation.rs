//! # Resource Mutator
//!
//! Looks up resources through the identifier index, builds single-item update
//! statements from typed attribute maps, and submits batches of statements as
//! one all-or-nothing transactional write.
//!
//! Statements are never retried implicitly. [`ResourceMutator::execute`]
//! submits once; [`ResourceMutator::execute_with_retry`] takes an explicit
//! [`RetryPolicy`] for transient store failures.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::codec::attribute::{encode_map, AttributeMap, Item, NativeValue, TaggedValue};
use crate::codec::payload::{compress, decode_item_payload};
use crate::config::MutationConfig;
use crate::constants::resource_key;
use crate::error::{MigrationError, Result};
use crate::resilience::RetryPolicy;
use crate::store::{
    render_key, ExpressionBuilder, KeyCondition, MutationStatement, QueryRequest, SharedStore,
    TableDescriptor,
};

/// A resource located through the identifier index
#[derive(Debug, Clone)]
pub struct FoundResource {
    /// Primary key of the stored item
    pub key: Item,
    pub item: Item,
    /// Decoded payload document, when the item carries one
    pub payload: Option<Value>,
}

/// Reads and transactional writes of resource items in one table
#[derive(Clone)]
pub struct ResourceMutator {
    store: SharedStore,
    table: TableDescriptor,
    settings: MutationConfig,
}

impl std::fmt::Debug for ResourceMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMutator")
            .field("table", &self.table)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ResourceMutator {
    pub fn new(store: SharedStore, table: TableDescriptor, settings: MutationConfig) -> Self {
        Self {
            store,
            table,
            settings,
        }
    }

    pub fn table(&self) -> &TableDescriptor {
        &self.table
    }

    /// Largest batch [`execute`](Self::execute) accepts
    pub fn max_statements(&self) -> usize {
        self.settings.max_statements_per_transaction
    }

    /// Find a resource by public identifier, or `None` if it does not exist
    ///
    /// Queries the identifier index for equality on both its partition and
    /// sort projections, limited to one result.
    pub async fn find_by_identifier(&self, identifier: &str) -> Result<Option<FoundResource>> {
        let projection = TaggedValue::S(format!("{}{identifier}", self.settings.identifier_prefix));
        let request = QueryRequest {
            table: self.table.name.clone(),
            index: Some(self.settings.identifier_index.clone()),
            key_condition: KeyCondition::partition_eq(
                self.settings.identifier_partition_key.clone(),
                projection.clone(),
            )
            .and_sort_eq(self.settings.identifier_sort_key.clone(), projection),
            filter: None,
            limit: Some(1),
            exclusive_start_key: None,
        };

        let page = self.store.query_page(&request).await?;
        let Some(item) = page.items.into_iter().next() else {
            debug!(
                table = %self.table.name,
                identifier,
                "🔍 MUTATOR: No resource with identifier"
            );
            return Ok(None);
        };

        let key = self.table.key_of(&item)?;
        let payload = item
            .get(&self.settings.payload_attribute)
            .map(|raw| decode_item_payload(raw, &render_key(&key)))
            .transpose()?;
        Ok(Some(FoundResource { key, item, payload }))
    }

    /// Build one update statement setting every attribute in `attributes`
    ///
    /// Every attribute name goes through a `#attrN` alias and every value
    /// through a `:valN` placeholder. Fails with
    /// [`MigrationError::UnsupportedType`] if a value cannot be encoded.
    pub fn build_update(&self, key: &Item, attributes: &AttributeMap) -> Result<MutationStatement> {
        let key = self.table.key_of(key)?;
        if attributes.is_empty() {
            return Err(MigrationError::unsupported_type(
                "empty attribute map",
                format!("update of {} sets no attributes", render_key(&key)),
            ));
        }
        if let Some(attr) = self
            .table
            .key_attributes()
            .find(|attr| attributes.contains_key(*attr))
        {
            return Err(MigrationError::unsupported_type(
                "key attribute",
                format!("update of {} would modify key attribute {attr}", render_key(&key)),
            ));
        }

        let encoded = encode_map(attributes)?;
        let mut names: Vec<&String> = encoded.keys().collect();
        names.sort();

        let mut builder = ExpressionBuilder::with_prefixes("#attr", ":val");
        let mut clauses = Vec::with_capacity(names.len());
        for name in names {
            let alias = builder.name(name);
            let placeholder = builder.value(encoded[name].clone());
            clauses.push(format!("{alias} = {placeholder}"));
        }
        let (expression_attribute_names, expression_attribute_values) = builder.into_parts();

        Ok(MutationStatement {
            table: self.table.name.clone(),
            key,
            update_expression: format!("SET {}", clauses.join(", ")),
            expression_attribute_names,
            expression_attribute_values,
        })
    }

    /// Statement replacing the payload document and stamping a fresh version
    pub fn build_payload_update(
        &self,
        key: &Item,
        payload: &Value,
        extra: AttributeMap,
    ) -> Result<MutationStatement> {
        let mut attributes = extra;
        attributes.insert(
            self.settings.payload_attribute.clone(),
            NativeValue::Bytes(compress(payload)?),
        );
        attributes.insert(
            self.settings.version_attribute.clone(),
            NativeValue::String(Uuid::new_v4().to_string()),
        );
        self.build_update(key, &attributes)
    }

    /// Write a new payload document, plus any `extra` attributes, for one resource
    pub async fn update_payload(&self, key: &Item, payload: &Value, extra: AttributeMap) -> Result<()> {
        let statement = self.build_payload_update(key, payload, extra)?;
        self.execute(vec![statement]).await
    }

    /// Build every statement, then submit them as one transaction
    ///
    /// If any statement fails to build, nothing is submitted and the whole
    /// batch fails with [`MigrationError::TransactionFailed`].
    pub async fn execute_updates(&self, updates: &[(Item, AttributeMap)]) -> Result<()> {
        let mut statements = Vec::with_capacity(updates.len());
        for (key, attributes) in updates {
            match self.build_update(key, attributes) {
                Ok(statement) => statements.push(statement),
                Err(err) => {
                    let keys: Vec<String> = updates
                        .iter()
                        .map(|(k, _)| format!("{}[{}]", self.table.name, render_key(k)))
                        .collect();
                    error!(
                        table = %self.table.name,
                        key = %render_key(key),
                        error = %err,
                        "❌ MUTATOR: Statement could not be built, batch not submitted"
                    );
                    return Err(MigrationError::transaction_failed(
                        keys,
                        format!("statement for {} could not be built: {err}", render_key(key)),
                    ));
                }
            }
        }
        self.execute(statements).await
    }

    /// Submit `statements` as one all-or-nothing transaction
    pub async fn execute(&self, statements: Vec<MutationStatement>) -> Result<()> {
        self.execute_with_retry(statements, &RetryPolicy::none()).await
    }

    /// Submit `statements` as one transaction, retrying transient store
    /// failures under `retry`
    pub async fn execute_with_retry(
        &self,
        statements: Vec<MutationStatement>,
        retry: &RetryPolicy,
    ) -> Result<()> {
        if statements.is_empty() {
            debug!(table = %self.table.name, "🔍 MUTATOR: Empty batch, nothing to write");
            return Ok(());
        }
        let keys: Vec<String> = statements.iter().map(MutationStatement::describe_key).collect();
        self.validate_batch(&statements, &keys)?;

        let store = &self.store;
        let statements = &statements;
        let outcome = retry
            .run("transact_write", || async move { store.transact_write(statements).await })
            .await;

        match outcome {
            Ok(()) => {
                info!(
                    table = %self.table.name,
                    statements = statements.len(),
                    "✅ MUTATOR: Transaction committed"
                );
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    failed @ MigrationError::TransactionFailed { .. } => failed,
                    other => MigrationError::transaction_failed(keys.clone(), other.to_string()),
                };
                error!(
                    table = %self.table.name,
                    keys = ?keys,
                    error = %err,
                    "❌ MUTATOR: Transaction failed, no statement applied"
                );
                Err(err)
            }
        }
    }

    fn validate_batch(&self, statements: &[MutationStatement], keys: &[String]) -> Result<()> {
        let limit = self.max_statements();
        if statements.len() > limit {
            return Err(MigrationError::transaction_failed(
                keys.to_vec(),
                format!(
                    "batch of {} statements exceeds the limit of {limit}; split it into smaller batches",
                    statements.len()
                ),
            ));
        }

        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(key.as_str()) {
                return Err(MigrationError::transaction_failed(
                    keys.to_vec(),
                    format!("{key} is addressed more than once in one transaction"),
                ));
            }
        }
        Ok(())
    }
}

/// Primary key of a resource whose partition and sort key are both
/// `Resource:{identifier}`
pub fn resource_primary_key(table: &TableDescriptor, identifier: &str) -> Item {
    let value = TaggedValue::S(resource_key(identifier));
    table
        .key_attributes()
        .map(|attr| (attr.to_string(), value.clone()))
        .collect()
}
