//! # System Constants
//!
//! Attribute names, index names and operational limits of the publication
//! registry's resource table, shared by the mutator, the iterator and the
//! configuration defaults.

/// Attribute names used by items in the resources table
pub mod attributes {
    /// Primary partition key
    pub const PK0: &str = "PK0";
    /// Primary sort key
    pub const SK0: &str = "SK0";
    /// Identifier index partition projection
    pub const PK3: &str = "PK3";
    /// Identifier index sort projection
    pub const SK3: &str = "SK3";
    /// Cristin identifier projection
    pub const PK4: &str = "PK4";
    /// Compressed JSON payload
    pub const DATA: &str = "data";
    /// Opaque version stamp rewritten on every mutation
    pub const VERSION: &str = "version";
    /// Key added to exported items holding the decoded payload
    pub const DECOMPRESSED_DATA: &str = "@data_decompressed";
}

/// Secondary index used to address a resource by its public identifier
pub const RESOURCES_BY_IDENTIFIER_INDEX: &str = "ResourcesByIdentifier";

/// Prefix of identifier projection values (`Resource:{identifier}`)
pub const RESOURCE_KEY_PREFIX: &str = "Resource:";

/// Default number of items requested per scan/query round trip
pub const DEFAULT_PAGE_SIZE: u32 = 700;

/// Default width of the task worker pool
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default cap on statements per transactional write
pub const DEFAULT_MAX_STATEMENTS_PER_TRANSACTION: usize = 25;

/// Hard store-side cap on statements per transactional write
pub const STORE_MAX_STATEMENTS_PER_TRANSACTION: usize = 100;

/// Store-side item size limit in bytes
pub const STORE_MAX_ITEM_BYTES: usize = 400 * 1024;

/// File name of the idempotency ledger inside a run's output directory
pub const DEFAULT_LEDGER_FILE_NAME: &str = "done_tasks.db";

/// Separator used when composing task keys from parts
pub const TASK_KEY_SEPARATOR: &str = ":";

/// Build the identifier projection value for a resource identifier
pub fn resource_key(identifier: &str) -> String {
    format!("{RESOURCE_KEY_PREFIX}{identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key() {
        assert_eq!(resource_key("0190e0e7"), "Resource:0190e0e7");
    }

    #[test]
    fn test_limits_are_consistent() {
        assert!(DEFAULT_MAX_STATEMENTS_PER_TRANSACTION <= STORE_MAX_STATEMENTS_PER_TRANSACTION);
        assert!(DEFAULT_PAGE_SIZE > 0);
        assert!(DEFAULT_CONCURRENCY > 0);
    }
}
