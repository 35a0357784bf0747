//! # In-Memory Store
//!
//! A [`StoreClient`] holding tables in process memory with the paging,
//! capacity, index, filter and all-or-nothing transaction behavior of the real
//! store. Used by the test suites and for dry runs; fault injection lets tests
//! interrupt scans and reject transactions on demand.
//!
//! Paging follows the store: `limit` bounds the items *evaluated* before the
//! filter applies, and a continuation key is returned whenever the limit is
//! reached, so the final round trip over an exactly divisible dataset is empty.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::codec::attribute::{item_size, Item};
use crate::constants::{STORE_MAX_ITEM_BYTES, STORE_MAX_STATEMENTS_PER_TRANSACTION};
use crate::error::{MigrationError, Result};
use crate::store::{
    render_key_value, MutationStatement, PageResponse, QueryRequest, ScanRequest, StoreClient,
    TableDescriptor, TableInfo, TableNamePage,
};

const DEFAULT_TABLE_NAME_PAGE: usize = 100;
const READ_UNIT_BYTES: f64 = 4096.0;

type Position = Vec<String>;

#[derive(Debug, Clone)]
struct IndexSchema {
    partition_key: String,
    sort_key: Option<String>,
}

#[derive(Debug)]
struct MemoryTable {
    descriptor: TableDescriptor,
    indexes: HashMap<String, IndexSchema>,
    items: BTreeMap<Position, Item>,
}

impl MemoryTable {
    fn position(&self, key: &Item) -> Result<Position> {
        let expected = self.descriptor.key_attributes().count();
        if key.len() != expected {
            return Err(MigrationError::store(
                "key",
                format!(
                    "ValidationException: The provided key element does not match the schema of table {}",
                    self.descriptor.name
                ),
            ));
        }
        self.descriptor
            .key_attributes()
            .map(|attr| {
                key.get(attr).map(render_key_value).ok_or_else(|| {
                    MigrationError::store(
                        "key",
                        format!(
                            "ValidationException: key attribute {attr} missing for table {}",
                            self.descriptor.name
                        ),
                    )
                })
            })
            .collect()
    }

    fn primary_key(&self, item: &Item) -> Item {
        self.descriptor
            .key_attributes()
            .filter_map(|attr| item.get(attr).map(|v| (attr.to_string(), v.clone())))
            .collect()
    }
}

#[derive(Debug)]
struct PageFault {
    after_pages: usize,
    remaining: usize,
    message: String,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    page_calls: usize,
    transactions: usize,
    page_fault: Option<PageFault>,
    transaction_faults: Option<(usize, String)>,
}

impl State {
    fn table(&self, name: &str, operation: &str) -> Result<&MemoryTable> {
        self.tables.get(name).ok_or_else(|| {
            MigrationError::store(
                operation,
                format!("ResourceNotFoundException: Requested resource not found: Table: {name} not found"),
            )
        })
    }

    fn check_page_fault(&mut self, operation: &str) -> Result<()> {
        let call = self.page_calls;
        self.page_calls += 1;
        if let Some(fault) = self.page_fault.as_mut() {
            if call >= fault.after_pages && fault.remaining > 0 {
                fault.remaining -= 1;
                return Err(MigrationError::store(operation, fault.message.clone()));
            }
        }
        Ok(())
    }
}

/// Process-local store with injectable faults
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
    table_name_page: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            table_name_page: DEFAULT_TABLE_NAME_PAGE,
        }
    }

    /// Return table names in pages of `size`, exercising name pagination
    pub fn with_table_name_page(mut self, size: usize) -> Self {
        self.table_name_page = size.max(1);
        self
    }

    pub fn create_table(&self, descriptor: TableDescriptor) {
        let mut state = self.state.lock();
        state.tables.insert(
            descriptor.name.clone(),
            MemoryTable {
                descriptor,
                indexes: HashMap::new(),
                items: BTreeMap::new(),
            },
        );
    }

    /// Add a secondary index projecting `partition_key` (and `sort_key`)
    pub fn create_index(
        &self,
        table: &str,
        index: &str,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let table = state.tables.get_mut(table).ok_or_else(|| {
            MigrationError::not_found(format!("table {table}"))
        })?;
        table.indexes.insert(
            index.to_string(),
            IndexSchema {
                partition_key: partition_key.to_string(),
                sort_key: sort_key.map(str::to_string),
            },
        );
        Ok(())
    }

    /// Insert or replace an item
    pub fn put_item(&self, table: &str, item: Item) -> Result<()> {
        let mut state = self.state.lock();
        let table = state.tables.get_mut(table).ok_or_else(|| {
            MigrationError::not_found(format!("table {table}"))
        })?;
        let position = table.position(&table.primary_key(&item))?;
        if item_size(&item) > STORE_MAX_ITEM_BYTES {
            return Err(MigrationError::store(
                "put_item",
                "ValidationException: Item size has exceeded the maximum allowed size",
            ));
        }
        table.items.insert(position, item);
        Ok(())
    }

    /// Snapshot of one item, bypassing fault injection
    pub fn item(&self, table: &str, key: &Item) -> Option<Item> {
        let state = self.state.lock();
        let table = state.tables.get(table)?;
        let position = table.position(key).ok()?;
        table.items.get(&position).cloned()
    }

    /// Snapshot of every item of a table in key order
    pub fn items(&self, table: &str) -> Vec<Item> {
        let state = self.state.lock();
        state
            .tables
            .get(table)
            .map(|t| t.items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Fail `count` page fetches once `after_pages` fetches have succeeded
    pub fn inject_page_failures(&self, after_pages: usize, count: usize, message: impl Into<String>) {
        let mut state = self.state.lock();
        state.page_fault = Some(PageFault {
            after_pages: state.page_calls + after_pages,
            remaining: count,
            message: message.into(),
        });
    }

    /// Cancel the next `count` transactional writes
    pub fn inject_transaction_failures(&self, count: usize, message: impl Into<String>) {
        self.state.lock().transaction_faults = Some((count, message.into()));
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.page_fault = None;
        state.transaction_faults = None;
    }

    /// Number of scan/query round trips served or failed
    pub fn page_calls(&self) -> usize {
        self.state.lock().page_calls
    }

    /// Number of transactional writes attempted
    pub fn transaction_count(&self) -> usize {
        self.state.lock().transactions
    }

    fn page_from(
        table: &MemoryTable,
        candidates: Vec<(Position, &Item)>,
        limit: Option<u32>,
        start_after: Option<Position>,
        filter: Option<&crate::store::Filter>,
        key_extra: &[&str],
    ) -> PageResponse {
        let limit = limit.map_or(usize::MAX, |l| (l as usize).max(1));
        let evaluated: Vec<&(Position, &Item)> = candidates
            .iter()
            .filter(|(position, _)| start_after.as_ref().map_or(true, |start| position > start))
            .take(limit)
            .collect();

        let bytes: usize = evaluated.iter().map(|(_, item)| item_size(item)).sum();
        let consumed_capacity = ((bytes as f64 / READ_UNIT_BYTES).ceil()).max(1.0) * 0.5;

        let last_evaluated_key = if evaluated.len() == limit {
            evaluated.last().map(|(_, item)| {
                let mut key = table.primary_key(item);
                for attr in key_extra {
                    if let Some(v) = item.get(*attr) {
                        key.insert((*attr).to_string(), v.clone());
                    }
                }
                key
            })
        } else {
            None
        };

        let items = evaluated
            .into_iter()
            .filter(|(_, item)| filter.map_or(true, |f| f.matches(item)))
            .map(|(_, item)| (*item).clone())
            .collect();

        PageResponse {
            items,
            last_evaluated_key,
            consumed_capacity,
        }
    }
}

fn reject(keys: &[String], reasons: &[Option<String>], detail: &str) -> MigrationError {
    let rendered: Vec<String> = reasons
        .iter()
        .map(|r| r.clone().unwrap_or_else(|| "None".to_string()))
        .collect();
    MigrationError::transaction_failed(
        keys.to_vec(),
        format!(
            "TransactionCanceledException: Transaction cancelled, cancellation reasons [{}]: {detail}",
            rendered.join(", ")
        ),
    )
}

/// Apply a `SET #a = :v, ...` expression to `item`
fn apply_update(item: &mut Item, statement: &MutationStatement, key_attrs: &[&str]) -> std::result::Result<(), String> {
    let body = statement
        .update_expression
        .trim()
        .strip_prefix("SET ")
        .ok_or_else(|| format!("unsupported update expression '{}'", statement.update_expression))?;

    let mut used_names = HashSet::new();
    let mut used_values = HashSet::new();
    let mut assignments = Vec::new();
    for clause in body.split(',') {
        let (lhs, rhs) = clause
            .split_once('=')
            .ok_or_else(|| format!("invalid SET clause '{}'", clause.trim()))?;
        let (lhs, rhs) = (lhs.trim(), rhs.trim());
        let name = if lhs.starts_with('#') {
            used_names.insert(lhs);
            statement
                .expression_attribute_names
                .get(lhs)
                .cloned()
                .ok_or_else(|| format!("undefined attribute name placeholder {lhs}"))?
        } else {
            lhs.to_string()
        };
        used_values.insert(rhs);
        let value = statement
            .expression_attribute_values
            .get(rhs)
            .cloned()
            .ok_or_else(|| format!("undefined attribute value placeholder {rhs}"))?;
        if key_attrs.contains(&name.as_str()) {
            return Err(format!("cannot update key attribute {name}"));
        }
        assignments.push((name, value));
    }

    if let Some(unused) = statement
        .expression_attribute_names
        .keys()
        .find(|k| !used_names.contains(k.as_str()))
    {
        return Err(format!("attribute name placeholder {unused} unused in expression"));
    }
    if let Some(unused) = statement
        .expression_attribute_values
        .keys()
        .find(|k| !used_values.contains(k.as_str()))
    {
        return Err(format!("attribute value placeholder {unused} unused in expression"));
    }

    for (name, value) in assignments {
        item.insert(name, value);
    }
    Ok(())
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn list_tables(&self, exclusive_start_table_name: Option<String>) -> Result<TableNamePage> {
        let state = self.state.lock();
        let lower = match exclusive_start_table_name {
            Some(start) => Bound::Excluded(start),
            None => Bound::Unbounded,
        };
        let mut remaining = state
            .tables
            .range::<String, _>((lower, Bound::Unbounded))
            .map(|(name, _)| name.clone());
        let names: Vec<String> = remaining.by_ref().take(self.table_name_page).collect();
        let more = remaining.next().is_some();
        Ok(TableNamePage {
            last_evaluated_table_name: if more { names.last().cloned() } else { None },
            names,
        })
    }

    async fn describe_table(&self, name: &str) -> Result<TableInfo> {
        let state = self.state.lock();
        let table = state.table(name, "describe_table")?;
        let mut indexes: Vec<String> = table.indexes.keys().cloned().collect();
        indexes.sort();
        Ok(TableInfo {
            descriptor: table.descriptor.clone(),
            item_count: Some(table.items.len() as i64),
            status: Some("ACTIVE".to_string()),
            indexes,
        })
    }

    async fn scan_page(&self, request: &ScanRequest) -> Result<PageResponse> {
        let mut state = self.state.lock();
        state.check_page_fault("scan")?;
        let table = state.table(&request.table, "scan")?;

        let start_after = request
            .exclusive_start_key
            .as_ref()
            .map(|key| table.position(&table.primary_key(key)))
            .transpose()?;
        let candidates: Vec<(Position, &Item)> = table
            .items
            .iter()
            .map(|(position, item)| (position.clone(), item))
            .collect();

        let page = Self::page_from(
            table,
            candidates,
            request.limit,
            start_after,
            request.filter.as_ref(),
            &[],
        );
        debug!(
            table = %request.table,
            items = page.items.len(),
            more = page.last_evaluated_key.is_some(),
            "🧪 MEMORY_STORE: Served scan page"
        );
        Ok(page)
    }

    async fn query_page(&self, request: &QueryRequest) -> Result<PageResponse> {
        let mut state = self.state.lock();
        state.check_page_fault("query")?;
        let table = state.table(&request.table, "query")?;

        let (partition_key, sort_key) = match &request.index {
            Some(index) => {
                let schema = table.indexes.get(index).ok_or_else(|| {
                    MigrationError::store(
                        "query",
                        format!(
                            "ValidationException: The table does not have the specified index: {index}"
                        ),
                    )
                })?;
                (schema.partition_key.clone(), schema.sort_key.clone())
            }
            None => (
                table.descriptor.partition_key.clone(),
                table.descriptor.sort_key.clone(),
            ),
        };

        if request.key_condition.partition_key != partition_key
            || request
                .key_condition
                .sort_attribute()
                .is_some_and(|attr| sort_key.as_deref() != Some(attr))
        {
            return Err(MigrationError::store(
                "query",
                "ValidationException: Query condition missed key schema element",
            ));
        }

        let key_filter = request.key_condition.as_filter();
        let order = |item: &Item, primary: &Position| -> Position {
            let mut position = vec![sort_key
                .as_deref()
                .and_then(|attr| item.get(attr))
                .map(render_key_value)
                .unwrap_or_default()];
            position.extend(primary.iter().cloned());
            position
        };

        let mut candidates: Vec<(Position, &Item)> = table
            .items
            .iter()
            .filter(|(_, item)| key_filter.matches(item))
            .map(|(primary, item)| (order(item, primary), item))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let start_after = request
            .exclusive_start_key
            .as_ref()
            .map(|key| {
                table
                    .position(&table.primary_key(key))
                    .map(|primary| order(key, &primary))
            })
            .transpose()?;

        let mut key_extra = vec![partition_key.as_str()];
        key_extra.extend(sort_key.as_deref());
        Ok(Self::page_from(
            table,
            candidates,
            request.limit,
            start_after,
            request.filter.as_ref(),
            &key_extra,
        ))
    }

    async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>> {
        let state = self.state.lock();
        let table = state.table(table, "get_item")?;
        let position = table.position(key)?;
        Ok(table.items.get(&position).cloned())
    }

    async fn transact_write(&self, statements: &[MutationStatement]) -> Result<()> {
        let mut state = self.state.lock();
        state.transactions += 1;
        if statements.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = statements.iter().map(MutationStatement::describe_key).collect();
        let mut reasons: Vec<Option<String>> = vec![None; statements.len()];

        if statements.len() > STORE_MAX_STATEMENTS_PER_TRANSACTION {
            return Err(MigrationError::transaction_failed(
                keys,
                format!(
                    "ValidationException: Member must have length less than or equal to {STORE_MAX_STATEMENTS_PER_TRANSACTION}"
                ),
            ));
        }

        if let Some((remaining, message)) = state.transaction_faults.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                let message = message.clone();
                return Err(reject(&keys, &reasons, &message));
            }
        }

        let mut staged: Vec<(String, Position, Item)> = Vec::with_capacity(statements.len());
        let mut seen = HashSet::new();
        for (i, statement) in statements.iter().enumerate() {
            let outcome = (|| -> std::result::Result<(Position, Item), String> {
                let table = state
                    .tables
                    .get(&statement.table)
                    .ok_or_else(|| format!("table {} not found", statement.table))?;
                let position = table.position(&statement.key).map_err(|e| e.to_string())?;
                if !seen.insert((statement.table.clone(), position.clone())) {
                    return Err("Transaction request cannot include multiple operations on one item".to_string());
                }
                let mut item = table
                    .items
                    .get(&position)
                    .cloned()
                    .unwrap_or_else(|| statement.key.clone());
                let key_attrs: Vec<&str> = table.descriptor.key_attributes().collect();
                apply_update(&mut item, statement, &key_attrs)?;
                if item_size(&item) > STORE_MAX_ITEM_BYTES {
                    return Err("Item size has exceeded the maximum allowed size".to_string());
                }
                Ok((position, item))
            })();

            match outcome {
                Ok((position, item)) => staged.push((statement.table.clone(), position, item)),
                Err(detail) => {
                    reasons[i] = Some("ValidationError".to_string());
                    return Err(reject(&keys, &reasons, &format!("{}: {detail}", keys[i])));
                }
            }
        }

        for (table, position, item) in staged {
            if let Some(table) = state.tables.get_mut(&table) {
                table.items.insert(position, item);
            }
        }
        Ok(())
    }
}
