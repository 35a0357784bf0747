//! # Batch Iterator
//!
//! Drives paginated scans and queries one page at a time. Each non-empty page
//! is decoded into [`DecodedItem`]s and handed out as a [`Batch`], either
//! pulled from a [`BatchCursor`] or pushed into a [`BatchSink`]. Running
//! totals live in [`BatchTotals`], owned by the cursor.
//!
//! Pages are delivered in the order the store returns them. A page fetch that
//! fails (after the cursor's retry policy gives up) ends iteration with
//! [`MigrationError::PageFetch`] carrying the last delivered batch index; the
//! iterator keeps no state across runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::codec::attribute::Item;
use crate::codec::payload::decode_item_payload;
use crate::constants::attributes::DATA;
use crate::error::{MigrationError, Result};
use crate::logging::{log_batch_progress, log_error};
use crate::resilience::RetryPolicy;
use crate::store::{
    Filter, KeyCondition, PageResponse, QueryRequest, ScanRequest, SharedStore, TableDescriptor,
};

/// What to do with an item whose payload fails to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Log the failure, report it in the batch and continue
    #[default]
    SkipAndLog,
    /// Stop iteration with the decode error
    Abort,
}

/// A stored item with its decoded payload
#[derive(Debug, Clone)]
pub struct DecodedItem {
    /// Primary key attributes
    pub key: Item,
    /// Primary key rendered for messages
    pub key_label: String,
    /// The raw stored item
    pub item: Item,
    /// The decoded payload document, when the item carries one
    pub payload: Option<Value>,
}

/// An item skipped because its payload could not be decoded
#[derive(Debug)]
pub struct DecodeFailure {
    pub key_label: String,
    /// The raw stored item
    pub item: Item,
    pub error: MigrationError,
}

/// One page of decoded items
#[derive(Debug)]
pub struct Batch {
    /// Zero-based position among the non-empty pages of this iteration
    pub index: usize,
    pub items: Vec<DecodedItem>,
    pub failures: Vec<DecodeFailure>,
    /// Capacity units the page consumed
    pub consumed_capacity: f64,
}

impl Batch {
    /// Items returned by the store for this page, decoded or not
    pub fn len(&self) -> usize {
        self.items.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Running totals across the pages of one iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchTotals {
    pub batches: usize,
    pub items: usize,
    pub decode_failures: usize,
    pub consumed_capacity: f64,
    /// Round trips including empty pages
    pub round_trips: usize,
}

/// Receiver of batches in push-style iteration
#[async_trait]
pub trait BatchSink: Send {
    /// Handle one batch; an error stops iteration and is returned to the caller
    async fn on_batch(&mut self, batch: Batch) -> Result<()>;
}

#[derive(Debug, Clone)]
enum PageSource {
    Scan(ScanRequest),
    Query(QueryRequest),
}

impl PageSource {
    fn set_start_key(&mut self, key: Option<Item>) {
        match self {
            PageSource::Scan(r) => r.exclusive_start_key = key,
            PageSource::Query(r) => r.exclusive_start_key = key,
        }
    }
}

/// Pull-style iteration state: continuation token plus totals
pub struct BatchCursor {
    store: SharedStore,
    table: TableDescriptor,
    source: PageSource,
    payload_attribute: String,
    decode_policy: DecodePolicy,
    retry: RetryPolicy,
    totals: BatchTotals,
    exhausted: bool,
}

impl std::fmt::Debug for BatchCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCursor")
            .field("table", &self.table.name)
            .field("totals", &self.totals)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl BatchCursor {
    pub fn totals(&self) -> &BatchTotals {
        &self.totals
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch and decode the next non-empty page, or `None` when the store has
    /// no continuation left
    pub async fn next_page(&mut self) -> Result<Option<Batch>> {
        while !self.exhausted {
            let page = match self.fetch().await {
                Ok(page) => page,
                Err(err) => return Err(self.interrupt("fetch_page", err)),
            };

            self.totals.round_trips += 1;
            self.totals.consumed_capacity += page.consumed_capacity;
            self.exhausted = page.last_evaluated_key.is_none();
            self.source.set_start_key(page.last_evaluated_key.clone());

            if page.items.is_empty() {
                continue;
            }

            let batch = match self.decode(page) {
                Ok(batch) => batch,
                Err(err) => return Err(self.interrupt("decode_page", err)),
            };
            self.totals.batches += 1;
            self.totals.items += batch.len();
            self.totals.decode_failures += batch.failures.len();
            log_batch_progress(
                &self.table.name,
                batch.index,
                batch.len(),
                self.totals.items,
                batch.consumed_capacity,
                self.totals.consumed_capacity,
            );
            return Ok(Some(batch));
        }
        Ok(None)
    }

    /// Stop the cursor for good and report where it stopped
    fn interrupt(&mut self, operation: &str, err: MigrationError) -> MigrationError {
        self.exhausted = true;
        let last = self.totals.batches.checked_sub(1);
        let context = format!(
            "table={} last_completed_batch={}",
            self.table.name,
            last.map_or_else(|| "none".to_string(), |b| b.to_string())
        );
        log_error("batch_iterator", operation, &err.to_string(), Some(&context));
        MigrationError::page_fetch(self.table.name.clone(), last, err)
    }

    async fn fetch(&self) -> Result<PageResponse> {
        let store = &self.store;
        match &self.source {
            PageSource::Scan(request) => {
                self.retry
                    .run("scan", || async move { store.scan_page(request).await })
                    .await
            }
            PageSource::Query(request) => {
                self.retry
                    .run("query", || async move { store.query_page(request).await })
                    .await
            }
        }
    }

    fn decode(&self, page: PageResponse) -> Result<Batch> {
        let mut items = Vec::with_capacity(page.items.len());
        let mut failures = Vec::new();

        for item in page.items {
            let key_label = self.table.describe_key(&item);
            let decoded = self
                .table
                .key_of(&item)
                .map_err(|e| MigrationError::decode(&key_label, format!("missing primary key: {e}")))
                .and_then(|key| {
                    let payload = item
                        .get(&self.payload_attribute)
                        .map(|raw| decode_item_payload(raw, &key_label))
                        .transpose()?;
                    Ok((key, payload))
                });
            match decoded {
                Ok((key, payload)) => items.push(DecodedItem {
                    key,
                    key_label,
                    item,
                    payload,
                }),
                Err(error) => match self.decode_policy {
                    DecodePolicy::Abort => return Err(error),
                    DecodePolicy::SkipAndLog => {
                        warn!(
                            table = %self.table.name,
                            key = %key_label,
                            error = %error,
                            "⚠️ BATCH: Skipping undecodable item"
                        );
                        failures.push(DecodeFailure {
                            key_label,
                            item,
                            error,
                        });
                    }
                },
            }
        }

        Ok(Batch {
            index: self.totals.batches,
            items,
            failures,
            consumed_capacity: page.consumed_capacity,
        })
    }

    /// Push every remaining batch into `sink`
    pub async fn drain_into<S>(&mut self, sink: &mut S) -> Result<BatchTotals>
    where
        S: BatchSink + ?Sized,
    {
        while let Some(batch) = self.next_page().await? {
            sink.on_batch(batch).await?;
        }
        Ok(self.totals.clone())
    }
}

/// Factory for scan and query cursors over one store
#[derive(Clone)]
pub struct BatchIterator {
    store: SharedStore,
    payload_attribute: String,
    decode_policy: DecodePolicy,
    retry: RetryPolicy,
}

impl std::fmt::Debug for BatchIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchIterator")
            .field("payload_attribute", &self.payload_attribute)
            .field("decode_policy", &self.decode_policy)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BatchIterator {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            payload_attribute: DATA.to_string(),
            decode_policy: DecodePolicy::default(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_payload_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.payload_attribute = attribute.into();
        self
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    /// Retry policy applied to each page fetch
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn cursor(&self, table: &TableDescriptor, source: PageSource) -> BatchCursor {
        BatchCursor {
            store: self.store.clone(),
            table: table.clone(),
            source,
            payload_attribute: self.payload_attribute.clone(),
            decode_policy: self.decode_policy,
            retry: self.retry.clone(),
            totals: BatchTotals::default(),
            exhausted: false,
        }
    }

    /// Cursor over a full-table scan; `page_size` is advisory
    pub fn scan_cursor(
        &self,
        table: &TableDescriptor,
        filter: Option<Filter>,
        page_size: u32,
    ) -> BatchCursor {
        self.cursor(
            table,
            PageSource::Scan(ScanRequest {
                table: table.name.clone(),
                filter: filter.filter(|f| !f.is_empty()),
                limit: Some(page_size.max(1)),
                exclusive_start_key: None,
            }),
        )
    }

    /// Cursor over a key-condition query on the table or one of its indexes
    pub fn query_cursor(
        &self,
        table: &TableDescriptor,
        index: Option<&str>,
        key_condition: KeyCondition,
        page_size: u32,
    ) -> BatchCursor {
        self.cursor(
            table,
            PageSource::Query(QueryRequest {
                table: table.name.clone(),
                index: index.map(str::to_string),
                key_condition,
                filter: None,
                limit: Some(page_size.max(1)),
                exclusive_start_key: None,
            }),
        )
    }

    /// Scan the whole table, pushing each batch into `sink`
    pub async fn scan<S>(
        &self,
        table: &TableDescriptor,
        filter: Option<Filter>,
        page_size: u32,
        sink: &mut S,
    ) -> Result<BatchTotals>
    where
        S: BatchSink + ?Sized,
    {
        self.scan_cursor(table, filter, page_size)
            .drain_into(sink)
            .await
    }

    /// Query by key condition, pushing each batch into `sink`
    pub async fn query<S>(
        &self,
        table: &TableDescriptor,
        index: Option<&str>,
        key_condition: KeyCondition,
        page_size: u32,
        sink: &mut S,
    ) -> Result<BatchTotals>
    where
        S: BatchSink + ?Sized,
    {
        self.query_cursor(table, index, key_condition, page_size)
            .drain_into(sink)
            .await
    }
}
