//! Scheduling façade: ties the task store to the worker pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::pool::{PoolConfig, PoolError, TaskHandler, WorkerPool};
use crate::store::{StoreError, TaskStore};
use crate::task::{NewTask, Task, TaskStatus, ValidationError};

/// Errors returned by [`Scheduler::enqueue`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task with id {id} already exists")]
    Duplicate { id: String },

    #[error("invalid task: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to enqueue task {id}: {source}")]
    Submit {
        id: String,
        #[source]
        source: PoolError,
    },
}

/// Accepts new tasks, tracks them in the store and hands them to the pool.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use taskpool::pool::{PoolConfig, SimulatedHandler};
/// use taskpool::scheduler::{Scheduler, SchedulerError};
/// use taskpool::store::InMemoryTaskStore;
/// use taskpool::task::{NewTask, TaskStatus};
///
/// let config = PoolConfig { workers: 0, queue_capacity: 4, ..PoolConfig::default() };
/// let scheduler = Scheduler::new(
///     config,
///     Arc::new(InMemoryTaskStore::new()),
///     SimulatedHandler::default(),
/// )
/// .unwrap();
///
/// scheduler.enqueue(NewTask::new("job-1", "payload", 3)).unwrap();
/// assert_eq!(scheduler.task_status("job-1"), Some(TaskStatus::Queued));
///
/// let again = scheduler.enqueue(NewTask::new("job-1", "payload", 3));
/// assert!(matches!(again, Err(SchedulerError::Duplicate { .. })));
/// ```
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    pool: WorkerPool,
}

impl Scheduler {
    /// Builds a scheduler whose pool persists into `store`.
    ///
    /// # Errors
    ///
    /// Propagates [`PoolError::ZeroCapacity`] from [`WorkerPool::new`].
    pub fn new(
        config: PoolConfig,
        store: Arc<dyn TaskStore>,
        handler: impl TaskHandler,
    ) -> Result<Self, PoolError> {
        let pool = WorkerPool::new(config, Arc::clone(&store), handler)?;
        Ok(Self { store, pool })
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Registers a new task as `queued` and submits it to the pool.
    ///
    /// If the pool refuses the task it is marked `failed` straight away,
    /// without consuming a retry, and stays in the store.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::Invalid`] if the task fails validation.
    /// - [`SchedulerError::Duplicate`] if the id is already tracked. Nothing is
    ///   mutated in that case.
    /// - [`SchedulerError::Store`] if the store rejects the insert.
    /// - [`SchedulerError::Submit`] if the pool rejects the task.
    pub fn enqueue(&self, new: NewTask) -> Result<Arc<Task>, SchedulerError> {
        if self.store.exists(&new.id) {
            return Err(SchedulerError::Duplicate { id: new.id });
        }

        let task = Arc::new(new.into_task()?);
        task.set_status(TaskStatus::Queued);
        self.store.create(Arc::clone(&task))?;

        if let Err(source) = self.pool.submit(Arc::clone(&task)) {
            task.set_status(TaskStatus::Failed);
            if let Err(e) = self.store.update(&task) {
                warn!(task_id = task.id(), error = %e, "failed to persist rejected task");
            }
            warn!(task_id = task.id(), error = %source, "task rejected by worker pool");
            return Err(SchedulerError::Submit {
                id: task.id().to_owned(),
                source,
            });
        }

        info!(
            task_id = task.id(),
            max_retries = task.max_retries(),
            "task enqueued"
        );
        Ok(task)
    }

    /// Returns the current status of a task, or `None` for an unknown id.
    pub fn task_status(&self, id: &str) -> Option<TaskStatus> {
        self.store.get_by_id(id).map(|task| task.status())
    }

    /// Returns the task record itself, for callers that need more than the status.
    pub fn task(&self, id: &str) -> Option<Arc<Task>> {
        self.store.get_by_id(id)
    }

    /// Counts tracked tasks per status at this instant.
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for task in self.store.get_all().values() {
            *counts.entry(task.status().as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Spawns the pool's executors. Must be called within a tokio runtime.
    pub fn start(&self) {
        self.pool.start();
    }

    /// Stops the pool and waits for its executors to exit.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
