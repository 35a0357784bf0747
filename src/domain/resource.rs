//! Publication payload with the affiliation rewrites used when an
//! organisation changes identifier.

use serde_json::Value;
use tracing::info;

/// A decoded publication document
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    data: Value,
}

impl Resource {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    pub fn identifier(&self) -> Option<&str> {
        self.data.get("identifier").and_then(Value::as_str)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    /// Rewrite every contributor affiliation id ending in `old_identifier`
    ///
    /// Returns the number of ids changed.
    pub fn migrate_contributor_affiliations(&mut self, old_identifier: &str, new_identifier: &str) -> usize {
        let Some(contributors) = self
            .data
            .pointer_mut("/entityDescription/contributors")
            .and_then(Value::as_array_mut)
        else {
            return 0;
        };

        let mut changed = 0;
        let affiliation_ids = contributors
            .iter_mut()
            .filter_map(|c| c.get_mut("affiliations").and_then(Value::as_array_mut))
            .flatten()
            .filter_map(|a| a.get_mut("id"));
        for id in affiliation_ids {
            let Some(current) = id.as_str() else { continue };
            if let Some(updated) = replace_suffix(current, old_identifier, new_identifier) {
                info!(
                    from = %current,
                    to = %updated,
                    "🏢 RESOURCE: Updating contributor affiliation"
                );
                *id = Value::String(updated);
                changed += 1;
            }
        }
        changed
    }

    /// Rewrite the owner affiliation if it ends in `old_identifier`
    ///
    /// Returns whether it changed.
    pub fn migrate_owner_affiliation(&mut self, old_identifier: &str, new_identifier: &str) -> bool {
        let Some(owner) = self.data.pointer_mut("/resourceOwner/ownerAffiliation") else {
            return false;
        };
        let Some(updated) = owner
            .as_str()
            .and_then(|current| replace_suffix(current, old_identifier, new_identifier))
        else {
            return false;
        };
        info!(to = %updated, "🏢 RESOURCE: Updating owner affiliation");
        *owner = Value::String(updated);
        true
    }
}

fn replace_suffix(value: &str, old: &str, new: &str) -> Option<String> {
    if old.is_empty() {
        return None;
    }
    value
        .strip_suffix(old)
        .map(|prefix| format!("{prefix}{new}"))
}
