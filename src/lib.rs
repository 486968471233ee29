//! # taskpool
//!
//! An in-memory task queue: callers submit tasks with a retry budget, a fixed
//! set of workers executes them from a bounded admission queue, and failed
//! attempts are re-queued after an exponential backoff with jitter until the
//! budget runs out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use taskpool::pool::{PoolConfig, SimulatedHandler};
//! use taskpool::scheduler::Scheduler;
//! use taskpool::store::InMemoryTaskStore;
//! use taskpool::task::NewTask;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = Scheduler::new(
//!         PoolConfig::default(),
//!         Arc::new(InMemoryTaskStore::new()),
//!         SimulatedHandler::default(),
//!     )?;
//!     scheduler.start();
//!     scheduler.enqueue(NewTask::new("job-1", "payload", 3))?;
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

// ── Task engine ───────────────────────────────────────────────────────────────
pub mod pool;
pub mod scheduler;
pub mod store;
pub mod task;

// ── HTTP surface ──────────────────────────────────────────────────────────────
pub mod api;
pub mod context;
pub mod http;
pub mod router;
pub mod server;

pub mod config;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use pool::{PoolConfig, PoolError, WorkerPool};
pub use scheduler::{Scheduler, SchedulerError};
pub use server::{Server, ServerError};
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{NewTask, Task, TaskStatus};
