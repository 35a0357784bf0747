//! # Migration Configuration
//!
//! Typed configuration for store access, page iteration, mutations, the task
//! engine and retries. Every section has built-in defaults so a run needs no
//! configuration file at all; see [`ConfigManager`] for the layering of file
//! and environment overrides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use registry_migrate::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let page_size = manager.config().scan.page_size;
//! let concurrency = manager.config().engine.concurrency;
//! # Ok(())
//! # }
//! ```

pub mod loader;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::DecodePolicy;
use crate::constants::{
    attributes, DEFAULT_CONCURRENCY, DEFAULT_LEDGER_FILE_NAME,
    DEFAULT_MAX_STATEMENTS_PER_TRANSACTION, DEFAULT_PAGE_SIZE, RESOURCES_BY_IDENTIFIER_INDEX,
    RESOURCE_KEY_PREFIX, STORE_MAX_STATEMENTS_PER_TRANSACTION,
};
use crate::error::{MigrationError, Result};
use crate::resilience::{BackoffConfig, RetryPolicy};
use crate::store::DynamoDbStoreConfig;

pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub store: StoreConfig,
    pub scan: ScanConfig,
    pub mutation: MutationConfig,
    pub engine: EngineConfig,
    pub retry: RetryConfig,
}

/// Connection overrides for the document store
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Named credentials profile
    pub profile: Option<String>,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            profile: None,
            timeout_ms: 30_000,
        }
    }
}

impl StoreConfig {
    pub fn to_dynamodb(&self) -> DynamoDbStoreConfig {
        DynamoDbStoreConfig {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            timeout_ms: Some(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Advisory number of items per page
    pub page_size: u32,
    pub decode_policy: DecodePolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            decode_policy: DecodePolicy::default(),
        }
    }
}

/// Attribute layout of resource items and transaction limits
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MutationConfig {
    pub payload_attribute: String,
    pub version_attribute: String,
    pub identifier_index: String,
    pub identifier_partition_key: String,
    pub identifier_sort_key: String,
    pub identifier_prefix: String,
    pub max_statements_per_transaction: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            payload_attribute: attributes::DATA.to_string(),
            version_attribute: attributes::VERSION.to_string(),
            identifier_index: RESOURCES_BY_IDENTIFIER_INDEX.to_string(),
            identifier_partition_key: attributes::PK3.to_string(),
            identifier_sort_key: attributes::SK3.to_string(),
            identifier_prefix: RESOURCE_KEY_PREFIX.to_string(),
            max_statements_per_transaction: DEFAULT_MAX_STATEMENTS_PER_TRANSACTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of tasks executed at once
    pub concurrency: usize,
    pub ledger_file: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            ledger_file: PathBuf::from(DEFAULT_LEDGER_FILE_NAME),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first; 1 disables retries
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            BackoffConfig {
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                multiplier: self.multiplier,
            },
        )
    }
}

impl MigrationConfig {
    /// Check value ranges and relationships between settings
    pub fn validate(&self) -> Result<()> {
        if self.scan.page_size == 0 {
            return Err(MigrationError::configuration(
                "scan.page_size",
                "must be greater than 0",
            ));
        }

        let limit = self.mutation.max_statements_per_transaction;
        if limit == 0 || limit > STORE_MAX_STATEMENTS_PER_TRANSACTION {
            return Err(MigrationError::configuration(
                "mutation.max_statements_per_transaction",
                format!("must be between 1 and {STORE_MAX_STATEMENTS_PER_TRANSACTION}, got {limit}"),
            ));
        }

        for (field, value) in [
            ("mutation.payload_attribute", &self.mutation.payload_attribute),
            ("mutation.version_attribute", &self.mutation.version_attribute),
            ("mutation.identifier_index", &self.mutation.identifier_index),
            ("mutation.identifier_partition_key", &self.mutation.identifier_partition_key),
            ("mutation.identifier_sort_key", &self.mutation.identifier_sort_key),
        ] {
            if value.trim().is_empty() {
                return Err(MigrationError::configuration(field, "must not be empty"));
            }
        }
        if self.mutation.payload_attribute == self.mutation.version_attribute {
            return Err(MigrationError::configuration(
                "mutation.version_attribute",
                "must differ from mutation.payload_attribute",
            ));
        }

        if self.engine.concurrency == 0 {
            return Err(MigrationError::configuration(
                "engine.concurrency",
                "must be at least 1",
            ));
        }
        if self.engine.ledger_file.as_os_str().is_empty() {
            return Err(MigrationError::configuration(
                "engine.ledger_file",
                "must not be empty",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(MigrationError::configuration(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(MigrationError::configuration(
                "retry.multiplier",
                format!("must be a finite value >= 1.0, got {}", self.retry.multiplier),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(MigrationError::configuration(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }

        if self.store.timeout_ms == 0 {
            return Err(MigrationError::configuration(
                "store.timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
