//! # Idempotent Task Engine
//!
//! Executes migration tasks exactly once per ledger: keys already recorded
//! are skipped, the rest run on a bounded worker pool, and each decided
//! outcome is written through the ledger's single writer.

pub mod executor;
pub mod ledger;
pub mod task;

pub use executor::{RunSummary, ShutdownSignal, TaskEngine};
pub use ledger::{Ledger, LedgerEntry, LedgerWriter};
pub use task::{FnWorker, MigrationTask, TaskKey, TaskOutcome, TaskWorker};
