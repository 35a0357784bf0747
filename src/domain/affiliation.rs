//! Worker moving publications from an old organisation identifier to a new one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::resource::Resource;
use crate::codec::AttributeMap;
use crate::engine::{MigrationTask, TaskKey, TaskOutcome, TaskWorker};
use crate::mutation::ResourceMutator;
use crate::resilience::RetryPolicy;

/// Which affiliation of a publication to rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffiliationScope {
    Contributors,
    Owner,
}

impl AffiliationScope {
    fn action(&self) -> &'static str {
        match self {
            AffiliationScope::Contributors => "contributor_affiliations",
            AffiliationScope::Owner => "owner_affiliation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationTask {
    pub identifier: String,
    pub scope: AffiliationScope,
}

impl AffiliationTask {
    pub fn contributors(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            scope: AffiliationScope::Contributors,
        }
    }

    pub fn owner(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            scope: AffiliationScope::Owner,
        }
    }
}

impl MigrationTask for AffiliationTask {
    fn key(&self) -> TaskKey {
        TaskKey::from_parts([self.identifier.as_str(), self.scope.action()])
    }
}

/// Looks up each resource, rewrites the affiliation and writes it back
///
/// A missing resource is a decided failure. A rejected transaction is an
/// error, which leaves the task not done for the next run.
#[derive(Debug, Clone)]
pub struct AffiliationMigration {
    mutator: ResourceMutator,
    old_identifier: String,
    new_identifier: String,
    retry: RetryPolicy,
}

impl AffiliationMigration {
    pub fn new(
        mutator: ResourceMutator,
        old_identifier: impl Into<String>,
        new_identifier: impl Into<String>,
    ) -> Self {
        Self {
            mutator,
            old_identifier: old_identifier.into(),
            new_identifier: new_identifier.into(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl TaskWorker<AffiliationTask> for AffiliationMigration {
    async fn run(&self, task: &AffiliationTask) -> anyhow::Result<TaskOutcome> {
        let Some(found) = self.mutator.find_by_identifier(&task.identifier).await? else {
            warn!(
                identifier = %task.identifier,
                table = %self.mutator.table().name,
                "⚠️ AFFILIATION: Resource not found"
            );
            return Ok(TaskOutcome::failure(format!("resource {} not found", task.identifier)));
        };
        let Some(payload) = found.payload else {
            warn!(identifier = %task.identifier, "⚠️ AFFILIATION: Resource has no payload");
            return Ok(TaskOutcome::failure(format!("resource {} has no payload", task.identifier)));
        };

        let mut resource = Resource::new(payload);
        let changed = match task.scope {
            AffiliationScope::Contributors => {
                resource.migrate_contributor_affiliations(&self.old_identifier, &self.new_identifier)
            }
            AffiliationScope::Owner => {
                usize::from(resource.migrate_owner_affiliation(&self.old_identifier, &self.new_identifier))
            }
        };
        if changed == 0 {
            return Ok(TaskOutcome::success("no matching affiliation, unchanged"));
        }

        let statement = self
            .mutator
            .build_payload_update(&found.key, resource.data(), AttributeMap::new())?;
        self.mutator
            .execute_with_retry(vec![statement], &self.retry)
            .await?;

        info!(
            identifier = %task.identifier,
            scope = task.scope.action(),
            changed,
            "✅ AFFILIATION: Resource updated"
        );
        Ok(TaskOutcome::success(format!(
            "updated {changed} affiliation(s) {} -> {}",
            self.old_identifier, self.new_identifier
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::attribute::{Item, TaggedValue};
    use crate::codec::payload::{compress, decompress};
    use crate::config::MutationConfig;
    use crate::constants::resource_key;
    use crate::store::{InMemoryStore, TableDescriptor};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryStore>, AffiliationMigration) {
        let store = Arc::new(InMemoryStore::new());
        let table = TableDescriptor::new("resources", "PK0", Some("SK0"));
        store.create_table(table.clone());
        store
            .create_index("resources", "ResourcesByIdentifier", "PK3", Some("SK3"))
            .unwrap();
        let key = resource_key("1");
        let payload = json!({
            "identifier": "1",
            "resourceOwner": {"ownerAffiliation": "https://host/cristin/organization/10.1.0.0"}
        });
        store
            .put_item(
                "resources",
                Item::from([
                    ("PK0".to_string(), TaggedValue::S(key.clone())),
                    ("SK0".to_string(), TaggedValue::S(key.clone())),
                    ("PK3".to_string(), TaggedValue::S(key.clone())),
                    ("SK3".to_string(), TaggedValue::S(key)),
                    ("data".to_string(), TaggedValue::B(compress(&payload).unwrap())),
                ]),
            )
            .unwrap();
        let mutator = ResourceMutator::new(store.clone(), table, MutationConfig::default());
        (store, AffiliationMigration::new(mutator, "10.1.0.0", "10.2.0.0"))
    }

    #[tokio::test]
    async fn test_owner_affiliation_is_rewritten() {
        let (store, worker) = setup();
        let outcome = worker.run(&AffiliationTask::owner("1")).await.unwrap();
        assert!(outcome.success);

        let item = store.items("resources").remove(0);
        let data = decompress(item["data"].as_b().unwrap()).unwrap();
        assert_eq!(
            data["resourceOwner"]["ownerAffiliation"],
            "https://host/cristin/organization/10.2.0.0"
        );
        assert!(item["version"].as_s().is_some());
    }

    #[tokio::test]
    async fn test_missing_resource_is_a_failure_outcome() {
        let (_, worker) = setup();
        let outcome = worker.run(&AffiliationTask::contributors("404")).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.output.contains("404"));
    }

    #[tokio::test]
    async fn test_rejected_transaction_is_an_error() {
        let (store, worker) = setup();
        store.inject_transaction_failures(1, "ConditionalCheckFailed");
        assert!(worker.run(&AffiliationTask::owner("1")).await.is_err());
        assert_eq!(AffiliationTask::owner("1").key().as_str(), "1:owner_affiliation");
    }
}
