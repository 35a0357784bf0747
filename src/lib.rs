#![allow(clippy::doc_markdown)] // Allow technical terms like DynamoDB, SQLite in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Registry Migrate
//!
//! Resource access, mutation and idempotent task execution for migrating
//! records of a research-publication registry stored in DynamoDB.
//!
//! ## Overview
//!
//! Records live as items of a wide-column store: a primary key (`PK0`/`SK0`),
//! secondary-index projections (`PK3`/`SK3`, ...) and a `data` attribute
//! holding the publication as raw-DEFLATE compressed JSON. This crate reads,
//! transforms and rewrites those items without violating the store's size,
//! type and transaction constraints, and can be restarted after a partial
//! failure without repeating completed work.
//!
//! ## Module Organization
//!
//! - [`codec`] - Tagged attribute encoding and the compressed payload format
//! - [`store`] - Store client seam, DynamoDB adapter, in-memory store
//! - [`resolver`] - Finding the one table matching a pattern
//! - [`batch`] - Paginated scan/query with per-page sinks
//! - [`mutation`] - Identifier lookup and all-or-nothing updates
//! - [`engine`] - Ledger-backed, at-most-once task execution
//! - [`domain`] - Publication transforms and task planning
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use registry_migrate::batch::{BatchFileWriter, BatchIterator};
//! use registry_migrate::config::ConfigManager;
//! use registry_migrate::resolver::TableResolver;
//! use registry_migrate::store::{DynamoDbStore, SharedStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! registry_migrate::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let sdk_config = aws_config::load_from_env().await;
//! let store: SharedStore = Arc::new(DynamoDbStore::new(&sdk_config, config.store.to_dynamodb()));
//!
//! let table = TableResolver::new(store.clone())
//!     .resolve_exact_or_substring("resources")
//!     .await?;
//!
//! let mut writer = BatchFileWriter::create("export").await?;
//! let totals = BatchIterator::new(store)
//!     .with_decode_policy(config.scan.decode_policy)
//!     .with_retry_policy(config.retry.to_retry_policy())
//!     .scan(&table, None, config.scan.page_size, &mut writer)
//!     .await?;
//! println!("exported {} items in {} batches", totals.items, totals.batches);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod codec;
pub mod config;
pub mod constants;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mutation;
pub mod resilience;
pub mod resolver;
pub mod store;

pub use batch::{Batch, BatchIterator, BatchSink, BatchTotals, DecodePolicy};
pub use codec::{AttributeMap, Item, NativeValue, TaggedValue};
pub use config::{ConfigManager, MigrationConfig};
pub use engine::{Ledger, MigrationTask, RunSummary, TaskEngine, TaskKey, TaskOutcome, TaskWorker};
pub use error::{MigrationError, Result};
pub use mutation::ResourceMutator;
pub use resolver::{TablePattern, TableResolver};
pub use store::{SharedStore, StoreClient, TableDescriptor};
