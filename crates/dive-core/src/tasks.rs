use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

/// Deferred unit of work. Every task is idempotent, so a retried or
/// duplicated task yields the same stored state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Cache projected columns/stats on a pending action.
    RecomputeStats { action_id: Uuid },
    /// Build the first snapshot of a joined table.
    MaterializeJoin { table_id: Uuid },
    /// Flush the table's pending actions into a new snapshot.
    ApplyTable { table_id: Uuid },
}

/// Sink for deferred work. The engine enqueues only after the write that
/// triggered the task has been committed.
pub trait TaskQueue: fmt::Debug + Send + Sync {
    fn enqueue(&self, task: Task);
}

/// Collects tasks for the caller to run later, e.g. synchronously in tests.
#[derive(Debug, Default)]
pub struct DeferredTasks {
    tasks: Mutex<Vec<Task>>,
}

impl DeferredTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued task in enqueue order.
    pub fn drain(&self) -> Vec<Task> {
        std::mem::take(&mut *self.tasks.lock().expect("task queue mutex poisoned"))
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().expect("task queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskQueue for DeferredTasks {
    fn enqueue(&self, task: Task) {
        self.tasks.lock().expect("task queue mutex poisoned").push(task);
    }
}

impl<Q: TaskQueue + ?Sized> TaskQueue for std::sync::Arc<Q> {
    fn enqueue(&self, task: Task) {
        (**self).enqueue(task)
    }
}
