//! Worker pool: bounded FIFO admission, a fixed set of executors and the
//! retry/backoff protocol.
//!
//! ## Dispatch episode
//!
//! An executor that pulls a task from the admission queue:
//!
//! 1. marks it `running` and persists it;
//! 2. runs the [`TaskHandler`];
//! 3. on success marks it `done`;
//! 4. on failure bumps the retry count, then either marks it `failed` (budget
//!    exhausted) or marks it `queued` and hands it to a retry timer.
//!
//! Retry timers are independent tokio tasks, so the executor is free as soon
//! as the episode's last write lands. A timer sleeps the [`Backoff`] delay and
//! then waits for admission capacity; it races the shutdown signal the whole
//! time and abandons the retry once shutdown is raised, leaving the task
//! `queued`.
//!
//! ## Shutdown
//!
//! [`WorkerPool::shutdown`] raises the signal and joins every executor. An
//! executor finishes the episode it is in, then exits. Queued tasks and
//! pending retries are not drained.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::store::TaskStore;
use crate::task::{Task, TaskStatus};

pub mod backoff;
pub mod handler;

pub use backoff::Backoff;
pub use handler::{ExecutionError, SimulatedHandler, TaskHandler};

/// Errors produced by the worker pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("queue is full")]
    QueueFull,

    #[error("worker pool is shut down")]
    Closed,

    #[error("queue capacity must be at least 1")]
    ZeroCapacity,
}

/// Sizing and timing for a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of concurrent executors. Zero is allowed: tasks are admitted
    /// but never dispatched.
    pub workers: usize,
    /// Admission queue capacity.
    pub queue_capacity: usize,
    /// Time unit of the retry backoff.
    pub backoff_unit: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

// State shared by executors and retry timers.
struct Shared {
    sender: mpsc::Sender<Arc<Task>>,
    receiver: AsyncMutex<mpsc::Receiver<Arc<Task>>>,
    shutdown: watch::Sender<bool>,
    store: Arc<dyn TaskStore>,
    handler: Arc<dyn TaskHandler>,
    backoff: Backoff,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    executors: Vec<JoinHandle<()>>,
}

/// Fixed-size pool of async executors fed by a bounded FIFO queue.
///
/// [`start`](Self::start) and retry scheduling spawn onto the ambient tokio
/// runtime, so both must be called from within one.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use taskpool::pool::{PoolConfig, PoolError, SimulatedHandler, WorkerPool};
/// use taskpool::store::InMemoryTaskStore;
/// use taskpool::task::Task;
///
/// let config = PoolConfig { workers: 0, queue_capacity: 1, ..PoolConfig::default() };
/// let pool = WorkerPool::new(
///     config,
///     Arc::new(InMemoryTaskStore::new()),
///     SimulatedHandler::default(),
/// )
/// .unwrap();
///
/// pool.submit(Arc::new(Task::new("a", "p", 1))).unwrap();
/// assert_eq!(
///     pool.submit(Arc::new(Task::new("b", "p", 1))),
///     Err(PoolError::QueueFull)
/// );
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
    config: PoolConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl WorkerPool {
    /// Creates a stopped pool. Call [`start`](Self::start) to spawn executors.
    ///
    /// # Errors
    ///
    /// [`PoolError::ZeroCapacity`] if `config.queue_capacity` is 0.
    pub fn new(
        config: PoolConfig,
        store: Arc<dyn TaskStore>,
        handler: impl TaskHandler,
    ) -> Result<Self, PoolError> {
        if config.queue_capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                sender,
                receiver: AsyncMutex::new(receiver),
                shutdown,
                store,
                handler: Arc::new(handler),
                backoff: Backoff::new(config.backoff_unit),
            }),
            config,
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Admits a task without waiting.
    ///
    /// A submit racing a concurrent [`shutdown`](Self::shutdown) may still be
    /// admitted; such a task stays `queued` and is never dispatched.
    ///
    /// # Errors
    ///
    /// - [`PoolError::QueueFull`] if the admission queue is at capacity.
    /// - [`PoolError::Closed`] once shutdown has been raised.
    pub fn submit(&self, task: Arc<Task>) -> Result<(), PoolError> {
        if self.shared.is_shutting_down() {
            return Err(PoolError::Closed);
        }
        self.shared.sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
        })
    }

    /// Number of tasks currently waiting in the admission queue.
    pub fn queued(&self) -> usize {
        self.shared.sender.max_capacity() - self.shared.sender.capacity()
    }

    /// Spawns the configured number of executors. Later calls are no-ops.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.started {
            debug!("worker pool already started");
            return;
        }
        lifecycle.started = true;

        for worker in 0..self.config.workers {
            let shared = Arc::clone(&self.shared);
            lifecycle
                .executors
                .push(tokio::spawn(async move { shared.run_executor(worker).await }));
        }

        info!(
            workers = self.config.workers,
            capacity = self.config.queue_capacity,
            "worker pool started"
        );
    }

    /// Raises the shutdown signal and waits for every executor to exit.
    ///
    /// In-flight episodes run to completion; queued tasks and pending retries
    /// are left where they are.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);

        let executors = std::mem::take(&mut self.lifecycle.lock().executors);
        let count = executors.len();
        for handle in executors {
            if let Err(e) = handle.await {
                error!(error = %e, "executor terminated abnormally");
            }
        }

        info!(executors = count, queued = self.queued(), "worker pool stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shutting_down()
    }
}

impl Shared {
    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run_executor(self: Arc<Self>, worker: usize) {
        let mut shutdown = self.shutdown.subscribe();
        debug!(worker, "executor started");

        loop {
            // Once the signal is up, queued tasks are left where they are.
            let task = tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                task = self.next_task() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            self.run_episode(worker, task).await;
        }

        debug!(worker, "executor exiting");
    }

    async fn next_task(&self) -> Option<Arc<Task>> {
        self.receiver.lock().await.recv().await
    }

    async fn run_episode(self: &Arc<Self>, worker: usize, task: Arc<Task>) {
        task.set_status(TaskStatus::Running);
        self.persist(&task);
        debug!(worker, task_id = task.id(), "task running");

        match self.handler.execute(Arc::clone(&task)).await {
            Ok(()) => {
                task.set_status(TaskStatus::Done);
                self.persist(&task);
                info!(worker, task_id = task.id(), "task completed");
            }
            Err(reason) => {
                let retries = task.increment_retries();
                let max_retries = task.max_retries();

                if retries >= max_retries {
                    task.set_status(TaskStatus::Failed);
                    self.persist(&task);
                    warn!(
                        worker,
                        task_id = task.id(),
                        retries,
                        error = %reason,
                        "task failed permanently"
                    );
                } else {
                    task.set_status(TaskStatus::Queued);
                    self.persist(&task);
                    let delay = self.backoff.delay(retries);
                    info!(
                        worker,
                        task_id = task.id(),
                        retries,
                        max_retries,
                        ?delay,
                        error = %reason,
                        "task failed, retry scheduled"
                    );
                    self.schedule_retry(task, delay);
                }
            }
        }
    }

    fn persist(&self, task: &Arc<Task>) {
        if let Err(e) = self.store.update(task) {
            warn!(task_id = task.id(), error = %e, "failed to persist task state");
        }
    }

    fn schedule_retry(self: &Arc<Self>, task: Arc<Task>, delay: Duration) {
        let shared = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let task_id = task.id().to_owned();

        tokio::spawn(async move {
            let resubmit = async {
                tokio::time::sleep(delay).await;
                // Blocks until the queue has room.
                shared.sender.send(task).await
            };

            tokio::select! {
                _ = stopped(&mut shutdown) => {
                    warn!(task_id = %task_id, "retry abandoned: pool shutting down");
                }
                sent = resubmit => match sent {
                    Ok(()) => debug!(task_id = %task_id, "task resubmitted"),
                    Err(_) => warn!(task_id = %task_id, "retry abandoned: queue closed"),
                },
            }
        });
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
