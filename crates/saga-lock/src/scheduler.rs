//! Fork/join task scheduler.
//!
//! `fork` spawns a unit of work on the tokio runtime and hands back a
//! `TaskHandle` immediately. `join` waits until every handle is terminal.
//! A failing or panicking task only fails itself; siblings always run to
//! completion.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio::sync::Notify;
use tracing::Instrument;

/// Sequential task identity, in fork order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct TaskId(u64);

impl TaskId {
    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError<E> {
    #[error("{task} has not completed")]
    NotCompleted { task: TaskId },
    #[error("{task} failed: {source}")]
    Failed {
        task: TaskId,
        #[source]
        source: E,
    },
    #[error("{task} panicked: {message}")]
    Panicked { task: TaskId, message: String },
}

impl<E> TaskError<E> {
    /// The task's own error, if it failed with one.
    pub fn task_error(&self) -> Option<&E> {
        match self {
            Self::Failed { source, .. } => Some(source),
            _ => None,
        }
    }
}

enum Outcome<T, E> {
    Value(T),
    Error(E),
    Panic(String),
}

struct TaskCell<T, E> {
    status: TaskStatus,
    outcome: Option<Outcome<T, E>>,
}

struct TaskShared<T, E> {
    cell: Mutex<TaskCell<T, E>>,
    done: Notify,
}

impl<T, E> TaskShared<T, E> {
    fn lock(&self) -> MutexGuard<'_, TaskCell<T, E>> {
        match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Task cell mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    fn set_running(&self) {
        self.lock().status = TaskStatus::Running;
    }

    fn finish(&self, outcome: Outcome<T, E>) {
        {
            let mut cell = self.lock();
            cell.status = match outcome {
                Outcome::Value(_) => TaskStatus::Completed,
                Outcome::Error(_) | Outcome::Panic(_) => TaskStatus::Failed,
            };
            cell.outcome = Some(outcome);
        }
        self.done.notify_waiters();
    }
}

/// Handle to a forked task for waiting and collecting its result.
pub struct TaskHandle<T, E> {
    id: TaskId,
    name: String,
    shared: Arc<TaskShared<T, E>>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.lock().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Wait until this task is terminal.
    pub async fn wait(&self) {
        loop {
            let notified = self.shared.done.notified();
            tokio::pin!(notified);
            // Register before checking so a finish in between is not missed.
            notified.as_mut().enable();
            if self.is_terminal() {
                return;
            }
            notified.await;
        }
    }
}

impl<T: Clone, E: Clone> TaskHandle<T, E> {
    /// The produced value, or why there is none.
    pub fn result(&self) -> Result<T, TaskError<E>> {
        let cell = self.shared.lock();
        match &cell.outcome {
            None => Err(TaskError::NotCompleted { task: self.id }),
            Some(Outcome::Value(v)) => Ok(v.clone()),
            Some(Outcome::Error(e)) => Err(TaskError::Failed {
                task: self.id,
                source: e.clone(),
            }),
            Some(Outcome::Panic(message)) => Err(TaskError::Panicked {
                task: self.id,
                message: message.clone(),
            }),
        }
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` and return its handle without waiting.
    ///
    /// Must be called within a tokio runtime.
    pub fn fork<F, Fut, T, E>(&self, name: impl Into<String>, work: F) -> TaskHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        let shared = Arc::new(TaskShared {
            cell: Mutex::new(TaskCell {
                status: TaskStatus::Pending,
                outcome: None,
            }),
            done: Notify::new(),
        });

        let span = tracing::info_span!("task", %id, name = %name);
        let task_shared = Arc::clone(&shared);
        tokio::spawn(
            async move {
                task_shared.set_running();
                tracing::debug!("Task running");
                let outcome = match AssertUnwindSafe(async move { work().await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(value)) => {
                        tracing::debug!("Task completed");
                        Outcome::Value(value)
                    }
                    Ok(Err(error)) => {
                        tracing::debug!(%error, "Task failed");
                        Outcome::Error(error)
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(%message, "Task panicked");
                        Outcome::Panic(message)
                    }
                };
                task_shared.finish(outcome);
            }
            .instrument(span),
        );

        tracing::trace!(%id, "Task forked");
        TaskHandle { id, name, shared }
    }

    /// Wait until every handle is terminal. Never cancels anything.
    pub async fn join<T, E>(&self, handles: &[TaskHandle<T, E>]) {
        for handle in handles {
            handle.wait().await;
        }
    }
}
