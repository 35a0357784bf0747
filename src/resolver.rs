//! # Table Resolver
//!
//! Finds the single live table matching an operator-supplied pattern among all
//! tables visible to the active credentials. Zero or several matches are
//! surfaced as [`MigrationError::NotFound`] and [`MigrationError::Ambiguous`];
//! the resolver never picks one of several candidates.

use std::fmt;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{MigrationError, Result};
use crate::store::{SharedStore, TableDescriptor, TableInfo};

/// How a table name is matched
#[derive(Debug, Clone)]
pub enum TablePattern {
    /// An exact name match wins; otherwise case-insensitive containment
    Substring(String),
    /// Regular expression anchored at the start of the table name
    Regex(Regex),
}

impl TablePattern {
    pub fn substring(pattern: impl Into<String>) -> Self {
        TablePattern::Substring(pattern.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(&format!("^(?:{pattern})"))
            .map(TablePattern::Regex)
            .map_err(|e| {
                MigrationError::configuration("table_pattern", format!("invalid regex '{pattern}': {e}"))
            })
    }

    /// Select the matching names from `names`
    pub fn select<'a>(&self, names: &'a [String]) -> Vec<&'a String> {
        match self {
            TablePattern::Substring(pattern) => {
                if let Some(exact) = names.iter().find(|n| *n == pattern) {
                    return vec![exact];
                }
                let needle = pattern.to_lowercase();
                names
                    .iter()
                    .filter(|n| n.to_lowercase().contains(&needle))
                    .collect()
            }
            TablePattern::Regex(re) => names.iter().filter(|n| re.is_match(n)).collect(),
        }
    }
}

impl fmt::Display for TablePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TablePattern::Substring(s) => f.write_str(s),
            TablePattern::Regex(re) => {
                let source = re.as_str();
                let inner = source
                    .strip_prefix("^(?:")
                    .and_then(|s| s.strip_suffix(')'))
                    .unwrap_or(source);
                f.write_str(inner)
            }
        }
    }
}

/// Resolves table patterns against the store's table list
#[derive(Clone)]
pub struct TableResolver {
    store: SharedStore,
}

impl fmt::Debug for TableResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableResolver").finish_non_exhaustive()
    }
}

impl TableResolver {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Every table name visible to the active credentials, following the
    /// store's pagination of the listing
    pub async fn list_table_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut start = None;
        loop {
            let page = self.store.list_tables(start.take()).await?;
            names.extend(page.names);
            match page.last_evaluated_table_name {
                Some(last) => start = Some(last),
                None => break,
            }
        }
        debug!(tables = names.len(), "🔎 RESOLVER: Listed tables");
        Ok(names)
    }

    /// All table names matching `pattern`
    pub async fn find_matches(&self, pattern: &TablePattern) -> Result<Vec<String>> {
        let names = self.list_table_names().await?;
        Ok(pattern.select(&names).into_iter().cloned().collect())
    }

    /// Resolve `pattern` to exactly one table and fetch its key schema
    pub async fn resolve(&self, pattern: &TablePattern) -> Result<TableDescriptor> {
        let mut matches = self.find_matches(pattern).await?;
        match matches.len() {
            0 => {
                warn!(pattern = %pattern, "⚠️ RESOLVER: No table matches pattern");
                Err(MigrationError::not_found(format!("table matching '{pattern}'")))
            }
            1 => {
                let name = matches.remove(0);
                let info = self.store.describe_table(&name).await?;
                info!(
                    pattern = %pattern,
                    table = %info.descriptor,
                    "✅ RESOLVER: Resolved table"
                );
                Ok(info.descriptor)
            }
            _ => {
                matches.sort();
                warn!(
                    pattern = %pattern,
                    candidates = ?matches,
                    "⚠️ RESOLVER: Pattern is ambiguous"
                );
                Err(MigrationError::ambiguous(pattern.to_string(), matches))
            }
        }
    }

    /// Resolve a plain substring pattern
    pub async fn resolve_exact_or_substring(&self, pattern: &str) -> Result<TableDescriptor> {
        self.resolve(&TablePattern::substring(pattern)).await
    }

    /// Key schema plus item count and status of a table
    pub async fn describe(&self, name: &str) -> Result<TableInfo> {
        self.store.describe_table(name).await
    }
}
