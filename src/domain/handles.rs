//! Planning of handle-import tasks from publications.
//!
//! A publication may carry handles at the top level (`handle`) and among its
//! `additionalIdentifiers`. Handles under one of the registry's controlled
//! prefixes that were not already issued by the registry itself become one
//! import task each.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::{MigrationTask, TaskKey};

/// Source name of handles the registry issued itself
pub const REGISTRY_SOURCE_NAME: &str = "nva@sikt";

const HANDLE_HOST: &str = "//hdl.handle.net/";
const HANDLE_IDENTIFIER_TYPE: &str = "HandleIdentifier";
const IMPORT_VERB: &str = "import";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleLocation {
    Top,
    Additional,
}

/// A handle found on a publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleReference {
    pub value: String,
    pub source_name: Option<String>,
    pub location: HandleLocation,
}

/// Import one handle for one publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleImportTask {
    pub identifier: String,
    pub publication_uri: String,
    pub handle: String,
}

impl MigrationTask for HandleImportTask {
    fn key(&self) -> TaskKey {
        TaskKey::from_parts([self.identifier.as_str(), self.handle.as_str(), IMPORT_VERB])
    }
}

#[derive(Debug, Clone)]
pub struct HandleTaskPlanner {
    application_domain: String,
    controlled_prefixes: Vec<String>,
}

impl HandleTaskPlanner {
    pub fn new<I, S>(application_domain: impl Into<String>, controlled_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            application_domain: application_domain.into(),
            controlled_prefixes: controlled_prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_controlled(&self, handle: &str) -> bool {
        !handle.is_empty()
            && self
                .controlled_prefixes
                .iter()
                .any(|prefix| handle.contains(&format!("{HANDLE_HOST}{prefix}")))
    }

    pub fn landing_page_uri(&self, identifier: &str) -> String {
        format!("https://{}/registration/{identifier}", self.application_domain)
    }

    /// Every handle on `publication`, top-level first
    pub fn handles(publication: &Value) -> Vec<HandleReference> {
        let mut handles = Vec::new();
        if let Some(top) = publication.get("handle").and_then(Value::as_str).filter(|h| !h.is_empty()) {
            handles.push(HandleReference {
                value: top.to_string(),
                source_name: None,
                location: HandleLocation::Top,
            });
        }

        let additional = publication
            .get("additionalIdentifiers")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|id| id.get("type").and_then(Value::as_str) == Some(HANDLE_IDENTIFIER_TYPE));
        for identifier in additional {
            let Some(value) = identifier.get("value").and_then(Value::as_str).filter(|v| !v.is_empty()) else {
                continue;
            };
            handles.push(HandleReference {
                value: value.to_string(),
                source_name: identifier
                    .get("sourceName")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                location: HandleLocation::Additional,
            });
        }
        handles
    }

    /// Import tasks for the controlled, not registry-issued handles of a publication
    pub fn plan(&self, publication: &Value) -> Vec<HandleImportTask> {
        let Some(identifier) = publication.get("identifier").and_then(Value::as_str) else {
            warn!("⚠️ HANDLES: Publication without identifier, no tasks planned");
            return Vec::new();
        };

        let tasks: Vec<HandleImportTask> = Self::handles(publication)
            .into_iter()
            .filter(|h| self.is_controlled(&h.value))
            .filter(|h| h.source_name.as_deref() != Some(REGISTRY_SOURCE_NAME))
            .map(|h| HandleImportTask {
                identifier: identifier.to_string(),
                publication_uri: self.landing_page_uri(identifier),
                handle: h.value,
            })
            .collect();

        debug!(identifier, tasks = tasks.len(), "Planned handle imports");
        tasks
    }

    /// Import task for a handle listed in a handle export
    ///
    /// `record` carries `sourceName` (list) and `nvaIds` (list). A task is
    /// produced only when the handle is controlled, not registry-issued, and
    /// points at exactly one publication.
    pub fn plan_from_handle_record(&self, handle: &str, record: &Value) -> Option<HandleImportTask> {
        let handle_url = format!("https:{HANDLE_HOST}{handle}");
        if !self.is_controlled(&handle_url) {
            return None;
        }

        if string_list(record, "sourceName").contains(&REGISTRY_SOURCE_NAME) {
            return None;
        }
        match string_list(record, "nvaIds").as_slice() {
            [identifier] => Some(HandleImportTask {
                identifier: identifier.to_string(),
                publication_uri: self.landing_page_uri(identifier),
                handle: handle_url,
            }),
            [] => None,
            ids => {
                warn!(
                    handle = %handle_url,
                    publications = ids.len(),
                    "⚠️ HANDLES: Handle points at several publications, skipping"
                );
                None
            }
        }
    }
}

fn string_list<'a>(record: &'a Value, field: &str) -> Vec<&'a str> {
    record
        .get(field)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}
