//! # Migration Error Types
//!
//! Structured error handling for the resource access and mutation layer using
//! thiserror instead of `Box<dyn Error>` patterns. Every variant carries enough
//! context (key, table, pattern, task) to produce an operator-facing message.

use thiserror::Error;

/// Store error codes that will fail the same way on every attempt
const NON_RETRYABLE_STORE_ERRORS: [&str; 4] = [
    "validation",
    "accessdenied",
    "resourcenotfound",
    "conditionalcheckfailed",
];

/// Errors produced by the codecs, the store layer, the mutator and the task engine
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Ambiguous pattern '{pattern}' matched {} tables: {}", .candidates.len(), .candidates.join(", "))]
    Ambiguous {
        pattern: String,
        candidates: Vec<String>,
    },

    #[error("Decode error for item {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Unsupported type {type_name}: {context}")]
    UnsupportedType { type_name: String, context: String },

    #[error("Transaction failed for [{}]: {reason}", .keys.join(", "))]
    TransactionFailed { keys: Vec<String>, reason: String },

    #[error("Ledger error: {operation}: {message}")]
    LedgerIo { operation: String, message: String },

    #[error("Store error: {operation}: {message}")]
    Store { operation: String, message: String },

    #[error("Page fetch failed on table {table} after batch {}: {source}", .last_completed_batch.map_or_else(|| "none".to_string(), |b| b.to_string()))]
    PageFetch {
        table: String,
        last_completed_batch: Option<usize>,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("I/O error: {path}: {message}")]
    Io { path: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl MigrationError {
    /// Create a not found error for a table, item or identifier
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an ambiguity error carrying every candidate name
    pub fn ambiguous(pattern: impl Into<String>, candidates: Vec<String>) -> Self {
        Self::Ambiguous {
            pattern: pattern.into(),
            candidates,
        }
    }

    /// Create a payload decode error for the item identified by `key`
    pub fn decode(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported type error naming the offending value's type
    pub fn unsupported_type(type_name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
            context: context.into(),
        }
    }

    /// Create a transaction failure covering every key in the write batch
    pub fn transaction_failed(keys: Vec<String>, reason: impl Into<String>) -> Self {
        Self::TransactionFailed {
            keys,
            reason: reason.into(),
        }
    }

    /// Create a ledger I/O error
    pub fn ledger_io(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LedgerIo {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a store (network/service) error
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Wrap a failure that interrupted a scan or query
    pub fn page_fetch(
        table: impl Into<String>,
        last_completed_batch: Option<usize>,
        source: MigrationError,
    ) -> Self {
        Self::PageFetch {
            table: table.into(),
            last_completed_batch,
            source: Box::new(source),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a local filesystem error
    pub fn io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether a retry of the same operation may succeed
    ///
    /// Only transient store failures qualify. Codec, ambiguity, transaction and
    /// ledger errors are deterministic or must never be silently retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { message, .. } => {
                let lower = message.to_ascii_lowercase();
                !NON_RETRYABLE_STORE_ERRORS
                    .iter()
                    .any(|marker| lower.contains(marker))
            }
            Self::PageFetch { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The last successfully processed batch index, when this error interrupted a scan
    pub fn last_completed_batch(&self) -> Option<usize> {
        match self {
            Self::PageFetch {
                last_completed_batch,
                ..
            } => *last_completed_batch,
            _ => None,
        }
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => MigrationError::ledger_io("query", "No rows found"),
            sqlx::Error::Database(db_err) => MigrationError::ledger_io("database", db_err.to_string()),
            sqlx::Error::PoolTimedOut => {
                MigrationError::ledger_io("pool", "Timed out acquiring a ledger connection")
            }
            sqlx::Error::PoolClosed => MigrationError::ledger_io("pool", "Ledger pool is closed"),
            _ => MigrationError::ledger_io("connection", err.to_string()),
        }
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::serialization(err.to_string())
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::io("<unknown>", err.to_string())
    }
}

impl From<config::ConfigError> for MigrationError {
    fn from(err: config::ConfigError) -> Self {
        MigrationError::configuration("loader", err.to_string())
    }
}

/// Result type alias for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_creation() {
        let err = MigrationError::not_found("table matching 'z-'");
        assert!(matches!(err, MigrationError::NotFound { .. }));

        let err = MigrationError::ambiguous("a-", vec!["a-dev".into(), "a-prod".into()]);
        assert!(matches!(err, MigrationError::Ambiguous { ref candidates, .. } if candidates.len() == 2));

        let err = MigrationError::transaction_failed(vec!["Resource:1".into()], "rejected");
        assert!(matches!(err, MigrationError::TransactionFailed { .. }));
    }

    #[test]
    fn test_error_display_names_affected_keys() {
        let err = MigrationError::ambiguous("a-", vec!["a-dev".into(), "a-prod".into()]);
        let display = format!("{err}");
        assert!(display.contains("'a-'"));
        assert!(display.contains("a-dev, a-prod"));

        let err = MigrationError::decode("PK0=Resource:1", "invalid deflate stream");
        let display = format!("{err}");
        assert!(display.contains("PK0=Resource:1"));
        assert!(display.contains("invalid deflate stream"));

        let err = MigrationError::page_fetch(
            "resources",
            Some(4),
            MigrationError::store("scan", "throttled"),
        );
        let display = format!("{err}");
        assert!(display.contains("after batch 4"));
        assert!(display.contains("throttled"));
    }

    #[test]
    fn test_retry_classification() {
        assert!(MigrationError::store("scan", "ProvisionedThroughputExceeded").is_retryable());
        assert!(!MigrationError::store("scan", "ValidationException: bad key").is_retryable());
        assert!(!MigrationError::store("scan", "ResourceNotFoundException: t").is_retryable());
        assert!(!MigrationError::transaction_failed(vec![], "cancelled").is_retryable());
        assert!(!MigrationError::ledger_io("insert", "disk full").is_retryable());

        let wrapped = MigrationError::page_fetch("t", None, MigrationError::store("query", "timeout"));
        assert!(wrapped.is_retryable());
        assert_eq!(wrapped.last_completed_batch(), None);
    }

    #[test]
    fn test_error_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid json").unwrap_err();
        let err: MigrationError = json_err.into();
        assert!(matches!(err, MigrationError::Serialization { .. }));

        let err: MigrationError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, MigrationError::LedgerIo { .. }));
    }
}
