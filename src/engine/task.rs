//! Task identity, outcomes and the worker seam.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::TASK_KEY_SEPARATOR;

/// Stable identity of a unit of migration work, e.g.
/// `{identifier}:{handle}:{verb}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(key: impl Into<String>) -> Self {
        TaskKey(key.into())
    }

    /// Join `parts` with `:`
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = parts
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(TASK_KEY_SEPARATOR);
        TaskKey(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKey {
    fn from(key: &str) -> Self {
        TaskKey::new(key)
    }
}

impl From<String> for TaskKey {
    fn from(key: String) -> Self {
        TaskKey(key)
    }
}

/// Anything the engine can execute once per key
pub trait MigrationTask: Send + Sync + 'static {
    fn key(&self) -> TaskKey;
}

/// Result of a worker run that reached a decision
///
/// Both successes and failures are recorded in the ledger and make the task
/// done. A worker that cannot reach a decision returns `Err` instead, which
/// leaves the task not done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub output: String,
}

impl TaskOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Executes one task
///
/// Implementations must be safe to invoke more than once for the same key
/// across ledgers; the engine only prevents re-invocation within one ledger.
#[async_trait]
pub trait TaskWorker<T: MigrationTask>: Send + Sync + 'static {
    async fn run(&self, task: &T) -> anyhow::Result<TaskOutcome>;
}

/// Adapts an async closure taking an owned task into a [`TaskWorker`]
pub struct FnWorker<T, F> {
    f: F,
    _task: PhantomData<fn(T)>,
}

impl<T, F> FnWorker<T, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _task: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> TaskWorker<T> for FnWorker<T, F>
where
    T: MigrationTask + Clone,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TaskOutcome>> + Send + 'static,
{
    async fn run(&self, task: &T) -> anyhow::Result<TaskOutcome> {
        (self.f)(task.clone()).await
    }
}
