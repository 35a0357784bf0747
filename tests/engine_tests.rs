mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use registry_migrate::batch::{Batch, BatchIterator, BatchSink};
use registry_migrate::codec::payload::decompress;
use registry_migrate::domain::{AffiliationMigration, AffiliationTask, HandleImportTask, HandleTaskPlanner};
use registry_migrate::engine::{FnWorker, Ledger, MigrationTask, TaskEngine, TaskKey, TaskOutcome, TaskWorker};
use registry_migrate::error::Result;
use serde_json::json;
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct Step(String);

impl MigrationTask for Step {
    fn key(&self) -> TaskKey {
        TaskKey::from_parts([self.0.as_str(), "step"])
    }
}

fn steps(ids: &[&str]) -> Vec<Step> {
    ids.iter().map(|id| Step(id.to_string())).collect()
}

fn counting_worker(calls: Arc<AtomicUsize>) -> Arc<impl TaskWorker<Step>> {
    Arc::new(FnWorker::new(move |step: Step| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if step.0 == "bad" {
                Ok::<_, anyhow::Error>(TaskOutcome::failure("rejected by worker"))
            } else {
                Ok(TaskOutcome::success(format!("done {}", step.0)))
            }
        }
    }))
}

#[tokio::test]
async fn test_tasks_run_once_across_engine_restarts() {
    let dir = TempDir::new().unwrap();
    let ledger_path = dir.path().join("done_tasks.db");
    let calls = Arc::new(AtomicUsize::new(0));

    let engine = TaskEngine::open(&ledger_path).await.unwrap();
    let summary = engine
        .submit(steps(&["a", "b", "bad"]), counting_worker(calls.clone()), 2)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    engine.close().await.unwrap();

    let engine = TaskEngine::open(&ledger_path).await.unwrap();
    let summary = engine
        .submit(steps(&["a", "b", "bad", "c"]), counting_worker(calls.clone()), 2)
        .await
        .unwrap();
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.succeeded, 1);
    engine.drain().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let bad = engine
        .ledger()
        .get(&Step("bad".into()).key())
        .await
        .unwrap()
        .unwrap();
    assert!(!bad.success);
    assert_eq!(bad.output, "rejected by worker");
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_cleared_entry_runs_again() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let engine = TaskEngine::new(Ledger::open_in_dir(dir.path()).await.unwrap());
    engine
        .submit(steps(&["bad"]), counting_worker(calls.clone()), 1)
        .await
        .unwrap();
    engine.close().await.unwrap();

    let ledger = Ledger::open_in_dir(dir.path()).await.unwrap();
    assert!(ledger.clear(&Step("bad".into()).key()).await.unwrap());
    let engine = TaskEngine::new(ledger);
    let summary = engine
        .submit(steps(&["bad"]), counting_worker(calls.clone()), 1)
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_worker_error_leaves_task_pending() {
    let dir = TempDir::new().unwrap();
    let engine = TaskEngine::open(dir.path().join("done_tasks.db")).await.unwrap();
    let worker = Arc::new(FnWorker::new(|_step: Step| async {
        Err::<TaskOutcome, _>(anyhow::anyhow!("store unavailable"))
    }));

    let summary = engine.submit(steps(&["a"]), worker, 1).await.unwrap();
    assert_eq!(summary.errored, 1);
    engine.drain().await.unwrap();
    assert!(!engine.is_done(&Step("a".into()).key()).await.unwrap());
    engine.close().await.unwrap();
}

/// Plans handle imports from every scanned publication
struct PlanHandles {
    planner: HandleTaskPlanner,
    tasks: Vec<HandleImportTask>,
}

#[async_trait]
impl BatchSink for PlanHandles {
    async fn on_batch(&mut self, batch: Batch) -> Result<()> {
        for payload in batch.items.iter().filter_map(|item| item.payload.as_ref()) {
            self.tasks.extend(self.planner.plan(payload));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_planned_handle_imports_are_idempotent() {
    let store = resource_store();
    put_resource(
        &store,
        "1",
        &json!({"identifier": "1", "handle": "https://hdl.handle.net/11250/1"}),
    );
    put_resource(
        &store,
        "2",
        &json!({
            "identifier": "2",
            "additionalIdentifiers": [
                {"type": "HandleIdentifier", "value": "https://hdl.handle.net/11250/2", "sourceName": "nva@sikt"},
                {"type": "HandleIdentifier", "value": "https://hdl.handle.net/11250/3"}
            ]
        }),
    );
    put_resource(&store, "3", &json!({"identifier": "3"}));

    let mut sink = PlanHandles {
        planner: HandleTaskPlanner::new("nva.sikt.no", ["11250"]),
        tasks: Vec::new(),
    };
    BatchIterator::new(store)
        .scan(&resources_table(), None, 2, &mut sink)
        .await
        .unwrap();
    assert_eq!(sink.tasks.len(), 2);

    let imported = Arc::new(AtomicUsize::new(0));
    let worker = {
        let imported = imported.clone();
        Arc::new(FnWorker::new(move |task: HandleImportTask| {
            let imported = imported.clone();
            async move {
                imported.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(TaskOutcome::success(task.publication_uri))
            }
        }))
    };

    let dir = TempDir::new().unwrap();
    let engine = TaskEngine::open(dir.path().join("done_tasks.db")).await.unwrap();
    let mut repeated = sink.tasks.clone();
    repeated.extend(sink.tasks.clone());
    let summary = engine.submit(repeated, worker.clone(), 4).await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped, 2);

    let summary = engine.submit(sink.tasks.clone(), worker, 4).await.unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(imported.load(Ordering::SeqCst), 2);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_affiliation_migration_through_engine() {
    let store = resource_store();
    put_resource(
        &store,
        "1",
        &json!({
            "identifier": "1",
            "entityDescription": {"contributors": [
                {"affiliations": [{"id": "https://api/cristin/organization/10.1.0.0"}]}
            ]},
            "resourceOwner": {"ownerAffiliation": "https://api/cristin/organization/10.1.0.0"}
        }),
    );
    let worker = Arc::new(AffiliationMigration::new(mutator(store.clone()), "10.1.0.0", "10.2.0.0"));

    let dir = TempDir::new().unwrap();
    let engine = TaskEngine::open(dir.path().join("done_tasks.db")).await.unwrap();
    let tasks = vec![
        AffiliationTask::contributors("1"),
        AffiliationTask::owner("1"),
        AffiliationTask::owner("missing"),
    ];
    let summary = engine.submit(tasks.clone(), worker.clone(), 1).await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);

    let item = store.items(RESOURCES_TABLE).remove(0);
    let payload = decompress(item["data"].as_b().unwrap()).unwrap();
    assert_eq!(
        payload["entityDescription"]["contributors"][0]["affiliations"][0]["id"],
        "https://api/cristin/organization/10.2.0.0"
    );
    assert_eq!(
        payload["resourceOwner"]["ownerAffiliation"],
        "https://api/cristin/organization/10.2.0.0"
    );
    let transactions = store.transaction_count();

    let summary = engine.submit(tasks, worker, 1).await.unwrap();
    assert_eq!(summary.skipped, 3);
    assert_eq!(store.transaction_count(), transactions);
    engine.close().await.unwrap();
}
