//! # Task Executor
//!
//! Dispatches tasks that are not yet in the ledger across a bounded pool of
//! concurrent workers and queues every decided outcome for the ledger writer.
//!
//! Per task: `Pending → (skipped if in ledger) → Running → Done(success|failure)`.
//! A worker error leaves the task not done, so the next run attempts it again.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::ledger::{Ledger, LedgerWriter};
use super::task::{MigrationTask, TaskKey, TaskWorker};
use crate::error::{MigrationError, Result};
use crate::logging::log_task_outcome;

/// Cooperative stop request shared between the driver and the engine
///
/// Once triggered, no new task is dispatched. Tasks already running finish
/// and their outcomes are still recorded.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
        info!("🛑 ENGINE: Shutdown requested, no new tasks will be dispatched");
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Resolves once a stop has been requested
async fn stop_requested(receiver: &mut watch::Receiver<bool>) {
    if receiver.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Counts for one [`TaskEngine::submit`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub submitted: usize,
    /// Already in the ledger, or repeated within this engine
    pub skipped: usize,
    pub succeeded: usize,
    /// Decided as failed and recorded
    pub failed: usize,
    /// Worker could not decide; not recorded
    pub errored: usize,
    /// Not dispatched because of shutdown or a ledger failure
    pub cancelled: usize,
}

impl RunSummary {
    pub fn executed(&self) -> usize {
        self.succeeded + self.failed + self.errored
    }
}

enum TaskResult {
    Recorded { success: bool },
    Errored,
    LedgerFailed(MigrationError),
}

/// Runs migration tasks at most once per ledger
#[derive(Debug)]
pub struct TaskEngine {
    ledger: Ledger,
    writer: LedgerWriter,
    /// Keys dispatched by this engine whose outcome is not in the ledger yet
    dispatched: Arc<DashSet<TaskKey>>,
    shutdown: ShutdownSignal,
}

impl TaskEngine {
    /// Start an engine over an open ledger
    pub fn new(ledger: Ledger) -> Self {
        let dispatched = Arc::new(DashSet::new());
        let writer = ledger.spawn_writer_releasing(dispatched.clone());
        Self {
            ledger,
            writer,
            dispatched,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Open the ledger file at `path` and start an engine over it
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Ledger::open(path).await?))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Tasks dispatched but not yet written to the ledger
    pub fn in_flight(&self) -> usize {
        self.dispatched.len()
    }

    /// Whether `key` is recorded in the ledger
    pub async fn is_done(&self, key: &TaskKey) -> Result<bool> {
        self.ledger.is_done(key).await
    }

    /// Execute every task not already done, at most `concurrency` at a time
    ///
    /// Returns after all dispatched tasks have finished and their outcomes
    /// have been queued; call [`drain`](Self::drain) before treating the run
    /// as complete. Fails with [`MigrationError::LedgerIo`] if the ledger can
    /// no longer be written, after letting in-flight tasks finish.
    pub async fn submit<T, W>(&self, tasks: Vec<T>, worker: Arc<W>, concurrency: usize) -> Result<RunSummary>
    where
        T: MigrationTask,
        W: TaskWorker<T>,
    {
        let concurrency = concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut shutdown = self.shutdown.subscribe();
        let mut running = JoinSet::new();
        let mut running_keys = HashMap::new();
        let mut summary = RunSummary {
            submitted: tasks.len(),
            ..RunSummary::default()
        };

        info!(tasks = tasks.len(), concurrency, "🚀 ENGINE: Submitting tasks");

        for task in tasks {
            if self.shutdown.is_triggered() || self.writer.failure().is_some() {
                summary.cancelled += 1;
                continue;
            }

            let key = task.key();
            if !self.dispatched.insert(key.clone()) {
                debug!(task_key = %key, "Task already dispatched by this engine, skipping");
                summary.skipped += 1;
                continue;
            }
            if self.ledger.is_done(&key).await? {
                info!(task_key = %key, "⏭️ ENGINE: Task already done, skipping");
                summary.skipped += 1;
                continue;
            }

            let permit = tokio::select! {
                biased;
                () = stop_requested(&mut shutdown) => {
                    self.dispatched.remove(&key);
                    summary.cancelled += 1;
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|e| MigrationError::configuration("task_engine", e.to_string()))?,
            };

            let worker = worker.clone();
            let writer = self.writer.clone();
            let dispatched = self.dispatched.clone();
            let task_key = key.clone();
            let handle = running.spawn(async move {
                let _permit = permit;
                match worker.run(&task).await {
                    Ok(outcome) => {
                        log_task_outcome(key.as_str(), &outcome);
                        let success = outcome.success;
                        match writer.record(key, outcome).await {
                            Ok(()) => TaskResult::Recorded { success },
                            Err(e) => TaskResult::LedgerFailed(e),
                        }
                    }
                    Err(e) => {
                        let reason = format!("{e:#}");
                        warn!(
                            task_key = %key,
                            error = %reason,
                            "❌ ENGINE: Task errored, left not done for a later run"
                        );
                        dispatched.remove(&key);
                        TaskResult::Errored
                    }
                }
            });
            running_keys.insert(handle.id(), task_key);
        }

        let mut ledger_failure = None;
        while let Some(joined) = running.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    running_keys.remove(&id);
                    match result {
                        TaskResult::Recorded { success: true } => summary.succeeded += 1,
                        TaskResult::Recorded { success: false } => summary.failed += 1,
                        TaskResult::Errored => summary.errored += 1,
                        TaskResult::LedgerFailed(e) => {
                            summary.errored += 1;
                            ledger_failure.get_or_insert(e);
                        }
                    }
                }
                Err(e) => {
                    let key = running_keys.remove(&e.id());
                    error!(
                        task_key = ?key.as_ref().map(TaskKey::as_str),
                        error = %e,
                        "❌ ENGINE: Worker task panicked or was aborted, left not done"
                    );
                    if let Some(key) = key {
                        self.dispatched.remove(&key);
                    }
                    summary.errored += 1;
                }
            }
        }

        info!(
            submitted = summary.submitted,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            errored = summary.errored,
            cancelled = summary.cancelled,
            "🏁 ENGINE: Submission finished"
        );

        match ledger_failure.or_else(|| self.writer.failure()) {
            Some(err) => {
                error!(error = %err, ?summary, "❌ ENGINE: Ledger failure ended the run");
                Err(err)
            }
            None => Ok(summary),
        }
    }

    /// Wait until every queued ledger write is flushed
    pub async fn drain(&self) -> Result<()> {
        self.writer.flush().await
    }

    /// Drain, stop the writer and close the ledger
    pub async fn close(self) -> Result<()> {
        let result = self.writer.close().await;
        self.ledger.close().await;
        result
    }
}
