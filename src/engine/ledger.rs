//! # Task Ledger
//!
//! Durable record of completed tasks in a local SQLite file (`done_tasks.db`
//! by default), one per migration output directory. A key present in the
//! ledger is never executed again; that check is the only idempotency
//! mechanism of the engine.
//!
//! Reads go straight to the pool. Writes go through a [`LedgerWriter`], a
//! single task that owns the write path and receives records over a channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::task::{TaskKey, TaskOutcome};
use crate::constants::DEFAULT_LEDGER_FILE_NAME;
use crate::error::{MigrationError, Result};

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS done_tasks (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        success INTEGER NOT NULL DEFAULT 1,
        output TEXT NOT NULL DEFAULT ''
    )";

const WRITE_QUEUE_CAPACITY: usize = 256;

/// One completed task
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerEntry {
    #[sqlx(rename = "id")]
    pub key: String,
    /// ISO-8601 completion time
    pub timestamp: String,
    pub success: bool,
    pub output: String,
}

/// Handle to the ledger database, cheap to clone and shared by all workers
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    path: PathBuf,
}

impl Ledger {
    /// Open (creating if needed) the ledger file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MigrationError::ledger_io("open", format!("{}: {e}", path.display())))?;

        let ledger = Self { pool, path };
        ledger.ensure_schema().await?;
        info!(path = %ledger.path.display(), "📒 LEDGER: Opened");
        Ok(ledger)
    }

    /// Open the default ledger file inside an output directory
    pub async fn open_in_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| MigrationError::ledger_io("open", format!("{}: {e}", dir.display())))?;
        Self::open(dir.join(DEFAULT_LEDGER_FILE_NAME)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the table, upgrading ledgers that only recorded key and time
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::ledger_io("create_schema", e.to_string()))?;

        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('done_tasks')")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| MigrationError::ledger_io("inspect_schema", e.to_string()))?;

        for (column, definition) in [
            ("success", "INTEGER NOT NULL DEFAULT 1"),
            ("output", "TEXT NOT NULL DEFAULT ''"),
        ] {
            if !columns.iter().any(|c| c == column) {
                warn!(
                    path = %self.path.display(),
                    column,
                    "⚠️ LEDGER: Upgrading ledger without {column} column"
                );
                sqlx::query(&format!("ALTER TABLE done_tasks ADD COLUMN {column} {definition}"))
                    .execute(&self.pool)
                    .await
                    .map_err(|e| MigrationError::ledger_io("upgrade_schema", e.to_string()))?;
            }
        }
        Ok(())
    }

    pub async fn is_done(&self, key: &TaskKey) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM done_tasks WHERE id = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MigrationError::ledger_io("is_done", format!("{key}: {e}")))?;
        Ok(found.is_some())
    }

    pub async fn get(&self, key: &TaskKey) -> Result<Option<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntry>(
            "SELECT id, timestamp, success, output FROM done_tasks WHERE id = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MigrationError::ledger_io("get", format!("{key}: {e}")))
    }

    /// Every entry, oldest first
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntry>(
            "SELECT id, timestamp, success, output FROM done_tasks ORDER BY timestamp, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrationError::ledger_io("entries", e.to_string()))
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM done_tasks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrationError::ledger_io("count", e.to_string()))
    }

    /// Remove a key so the next run executes it again
    ///
    /// Returns whether an entry was removed.
    pub async fn clear(&self, key: &TaskKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM done_tasks WHERE id = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::ledger_io("clear", format!("{key}: {e}")))?;
        let removed = result.rows_affected() > 0;
        if removed {
            info!(task_key = %key, "🧹 LEDGER: Cleared task for re-execution");
        }
        Ok(removed)
    }

    /// Insert an entry; an existing entry for the key is kept as is
    ///
    /// Returns whether a new entry was written.
    pub(crate) async fn record(&self, key: &TaskKey, outcome: &TaskOutcome) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO done_tasks (id, timestamp, success, output) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(key.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(outcome.success)
        .bind(&outcome.output)
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::ledger_io("record", format!("{key}: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Start the single writer for this ledger
    pub fn spawn_writer(&self) -> LedgerWriter {
        LedgerWriter::spawn(self.clone(), Arc::new(DashSet::new()))
    }

    /// Start the single writer, removing each key from `pending` once its
    /// row is in the ledger
    pub fn spawn_writer_releasing(&self, pending: Arc<DashSet<TaskKey>>) -> LedgerWriter {
        LedgerWriter::spawn(self.clone(), pending)
    }
}

enum LedgerCommand {
    Record { key: TaskKey, outcome: TaskOutcome },
    Flush(oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<Result<()>>),
}

/// Sender side of the ledger's single-writer task
///
/// Records are queued and written in arrival order. The first write error is
/// sticky: later records are refused and every flush reports it.
#[derive(Clone)]
pub struct LedgerWriter {
    sender: mpsc::Sender<LedgerCommand>,
    failure: Arc<Mutex<Option<String>>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for LedgerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerWriter")
            .field("failure", &*self.failure.lock())
            .finish_non_exhaustive()
    }
}

impl LedgerWriter {
    fn spawn(ledger: Ledger, pending: Arc<DashSet<TaskKey>>) -> Self {
        let (sender, receiver) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let failure = Arc::new(Mutex::new(None));
        let handle = tokio::spawn(run_writer(ledger, receiver, failure.clone(), pending));
        Self {
            sender,
            failure,
            handle: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queue a completed task for writing
    pub async fn record(&self, key: TaskKey, outcome: TaskOutcome) -> Result<()> {
        if let Some(err) = self.failure() {
            return Err(err);
        }
        self.sender
            .send(LedgerCommand::Record { key, outcome })
            .await
            .map_err(|_| MigrationError::ledger_io("record", "ledger writer has stopped"))
    }

    /// The write error that stopped this writer, if any
    pub fn failure(&self) -> Option<MigrationError> {
        let failed = self.failure.lock().clone();
        failed.map(|message| MigrationError::ledger_io("record", message))
    }

    /// Wait until every record queued before this call has been written
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(LedgerCommand::Flush(ack))
            .await
            .map_err(|_| MigrationError::ledger_io("flush", "ledger writer has stopped"))?;
        done.await
            .map_err(|_| MigrationError::ledger_io("flush", "ledger writer has stopped"))?
    }

    /// Flush, then stop the writer task
    pub async fn close(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        let result = match self.sender.send(LedgerCommand::Close(ack)).await {
            Ok(()) => done
                .await
                .unwrap_or_else(|_| Err(MigrationError::ledger_io("close", "ledger writer has stopped"))),
            Err(_) => Ok(()),
        };
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "❌ LEDGER: Writer task ended abnormally");
            }
        }
        result
    }
}

async fn run_writer(
    ledger: Ledger,
    mut receiver: mpsc::Receiver<LedgerCommand>,
    failure: Arc<Mutex<Option<String>>>,
    pending: Arc<DashSet<TaskKey>>,
) {
    let mut written: u64 = 0;
    let status = |failure: &Arc<Mutex<Option<String>>>| -> Result<()> {
        let failed = failure.lock().clone();
        match failed {
            Some(message) => Err(MigrationError::ledger_io("flush", message)),
            None => Ok(()),
        }
    };

    while let Some(command) = receiver.recv().await {
        match command {
            LedgerCommand::Record { key, outcome } => {
                let failed = failure.lock().is_some();
                if failed {
                    error!(task_key = %key, "❌ LEDGER: Writer failed earlier, record not written");
                    continue;
                }
                match ledger.record(&key, &outcome).await {
                    Ok(true) => {
                        written += 1;
                        pending.remove(&key);
                    }
                    Ok(false) => {
                        debug!(task_key = %key, "Task already recorded, keeping first entry");
                        pending.remove(&key);
                    }
                    Err(e) => {
                        error!(
                            task_key = %key,
                            path = %ledger.path().display(),
                            error = %e,
                            "❌ LEDGER: Write failed, run can no longer be recorded"
                        );
                        *failure.lock() = Some(e.to_string());
                    }
                }
            }
            LedgerCommand::Flush(ack) => {
                let _ = ack.send(status(&failure));
            }
            LedgerCommand::Close(ack) => {
                let _ = ack.send(status(&failure));
                break;
            }
        }
    }
    debug!(written, path = %ledger.path().display(), "Ledger writer stopped");
}
