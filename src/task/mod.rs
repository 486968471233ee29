//! Task records: the unit of work and its lifecycle state.
//!
//! A [`Task`] carries immutable identity (id, payload, retry budget) plus a
//! small block of mutable state (status and retry count) guarded by a single
//! lock, so a reader always sees a status/retry pair that existed at one
//! instant. The record never validates transitions; the worker pool drives
//! them in a fixed order.
//!
//! | Status    | Meaning                                      | Terminal |
//! |-----------|----------------------------------------------|----------|
//! | `queued`  | admitted, waiting for (or returned to) a worker | no    |
//! | `running` | being executed by a worker                   | no       |
//! | `done`    | executed successfully                        | yes      |
//! | `failed`  | exhausted its retries or was never admitted  | yes      |

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a [`Task`].
///
/// # Examples
///
/// ```
/// use taskpool::task::TaskStatus;
///
/// assert_eq!(TaskStatus::Queued.as_str(), "queued");
/// assert!(TaskStatus::Done.is_terminal());
/// assert!(!TaskStatus::Running.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    /// Returns the lowercase wire name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `done` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    retries: u32,
}

/// A single unit of work, shared between the store and the worker pool.
///
/// All mutation goes through `&self` accessors that take the record's lock,
/// so a `Task` is normally held behind an `Arc`.
///
/// # Examples
///
/// ```
/// use taskpool::task::{Task, TaskStatus};
///
/// let task = Task::new("resize-42", "thumbnail.png", 3);
/// assert_eq!(task.status(), TaskStatus::Queued);
///
/// task.set_status(TaskStatus::Running);
/// assert_eq!(task.increment_retries(), 1);
/// assert_eq!(task.snapshot(), (TaskStatus::Running, 1));
/// ```
#[derive(Debug)]
pub struct Task {
    id: String,
    payload: String,
    max_retries: u32,
    state: Mutex<TaskState>,
}

impl Task {
    /// Creates a record in the `queued` state with zero retries.
    pub fn new(id: impl Into<String>, payload: impl Into<String>, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            max_retries,
            state: Mutex::new(TaskState {
                status: TaskStatus::Queued,
                retries: 0,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Overwrites the status. Any transition is accepted.
    pub fn set_status(&self, status: TaskStatus) {
        self.state.lock().status = status;
    }

    /// Records one failed attempt and returns the new retry count.
    pub fn increment_retries(&self) -> u32 {
        let mut state = self.state.lock();
        state.retries = state.retries.saturating_add(1);
        state.retries
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn retries(&self) -> u32 {
        self.state.lock().retries
    }

    /// Returns status and retry count read under one lock acquisition.
    pub fn snapshot(&self) -> (TaskStatus, u32) {
        let state = self.state.lock();
        (state.status, state.retries)
    }
}

/// Reasons a [`NewTask`] is rejected before it reaches the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("task id must not be empty")]
    MissingId,

    #[error("task payload must not be empty")]
    MissingPayload,

    #[error("max_retries must be positive")]
    NonPositiveMaxRetries,
}

/// Caller-supplied task description, as decoded from a request body.
///
/// Missing fields decode to their empty defaults so that [`validate`](Self::validate)
/// reports them instead of the JSON decoder.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewTask {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub max_retries: i64,
}

impl NewTask {
    pub fn new(id: impl Into<String>, payload: impl Into<String>, max_retries: i64) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            max_retries,
        }
    }

    /// Checks the three required fields: non-empty id, non-empty payload,
    /// positive retry budget.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found, checked in field order.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingId);
        }
        if self.payload.is_empty() {
            return Err(ValidationError::MissingPayload);
        }
        if self.max_retries <= 0 {
            return Err(ValidationError::NonPositiveMaxRetries);
        }
        Ok(())
    }

    /// Validates and converts into a fresh `queued` [`Task`].
    ///
    /// Retry budgets above `u32::MAX` are clamped.
    pub fn into_task(self) -> Result<Task, ValidationError> {
        self.validate()?;
        let max_retries = u32::try_from(self.max_retries).unwrap_or(u32::MAX);
        Ok(Task::new(self.id, self.payload, max_retries))
    }
}
