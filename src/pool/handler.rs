//! The work a worker performs for one dispatch episode.

use std::future::Future;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::task::Task;

/// A failed execution attempt. This is an expected outcome that feeds the
/// retry state machine, not an error surfaced to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Boxed future returned by [`TaskHandler::execute`].
pub type ExecutionFuture = Pin<Box<dyn Future<Output = Result<(), ExecutionError>> + Send>>;

/// Executes one attempt of a task.
///
/// Any `Fn(Arc<Task>) -> impl Future<Output = Result<(), ExecutionError>>`
/// that is `Send + Sync + 'static` implements this trait via the blanket
/// impl below, so tests and callers can pass plain async closures.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use taskpool::pool::handler::{ExecutionError, TaskHandler};
/// use taskpool::task::Task;
///
/// fn accepts(_: impl TaskHandler) {}
///
/// accepts(|task: Arc<Task>| async move {
///     if task.payload().is_empty() {
///         Err(ExecutionError::new("nothing to do"))
///     } else {
///         Ok(())
///     }
/// });
/// ```
pub trait TaskHandler: Send + Sync + 'static {
    fn execute(&self, task: Arc<Task>) -> ExecutionFuture;
}

impl<T, F> TaskHandler for T
where
    T: Fn(Arc<Task>) -> F + Send + Sync + 'static,
    F: Future<Output = Result<(), ExecutionError>> + Send + 'static,
{
    fn execute(&self, task: Arc<Task>) -> ExecutionFuture {
        Box::pin((self)(task))
    }
}

/// Stand-in workload: sleeps a random duration, then fails with a fixed
/// probability.
#[derive(Debug, Clone)]
pub struct SimulatedHandler {
    failure_rate: f64,
    duration: Range<Duration>,
}

impl Default for SimulatedHandler {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl SimulatedHandler {
    /// Creates a handler failing with probability `failure_rate` (clamped to
    /// `[0, 1]`, NaN counts as 0) after 100–500 ms of simulated work.
    pub fn new(failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        Self {
            failure_rate,
            duration: Duration::from_millis(100)..Duration::from_millis(500),
        }
    }

    /// Sets the range the simulated work duration is drawn from. An empty
    /// range means the work takes exactly `range.start`.
    #[must_use]
    pub fn with_duration(mut self, range: Range<Duration>) -> Self {
        self.duration = range;
        self
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    // Draw both decisions up front; `ThreadRng` must not live across an await.
    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let work = if self.duration.is_empty() {
            self.duration.start
        } else {
            rng.gen_range(self.duration.clone())
        };
        (work, rng.gen_bool(self.failure_rate))
    }
}

impl TaskHandler for SimulatedHandler {
    fn execute(&self, task: Arc<Task>) -> ExecutionFuture {
        let (work, fail) = self.roll();
        Box::pin(async move {
            tokio::time::sleep(work).await;
            if fail {
                Err(ExecutionError::new(format!(
                    "simulated failure of task {} after {work:?}",
                    task.id()
                )))
            } else {
                Ok(())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(rate: f64) -> SimulatedHandler {
        SimulatedHandler::new(rate).with_duration(Duration::ZERO..Duration::ZERO)
    }

    #[tokio::test]
    async fn always_failing_simulation() {
        let task = Arc::new(Task::new("t", "p", 1));
        let result = instant(1.0).execute(task).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn never_failing_simulation() {
        let task = Arc::new(Task::new("t", "p", 1));
        assert_eq!(instant(0.0).execute(task).await, Ok(()));
    }

    #[test]
    fn failure_rate_is_clamped() {
        assert_eq!(SimulatedHandler::new(4.0).failure_rate(), 1.0);
        assert_eq!(SimulatedHandler::new(-1.0).failure_rate(), 0.0);
        assert_eq!(SimulatedHandler::new(f64::NAN).failure_rate(), 0.0);
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler = |task: Arc<Task>| async move {
            Err::<(), _>(ExecutionError::new(format!("boom {}", task.id())))
        };
        let err = handler
            .execute(Arc::new(Task::new("x", "p", 1)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom x");
    }
}
