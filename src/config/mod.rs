//! Runtime configuration from command-line flags and environment variables.
//!
//! Every flag falls back to an environment variable of the same name in
//! upper snake case (`--queue-size` ↔ `QUEUE_SIZE`), then to a default.

use std::ops::Range;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::pool::PoolConfig;

/// Configuration values that parse but cannot be used.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("queue size must be at least 1")]
    ZeroQueueSize,

    #[error("failure rate must be within [0, 1], got {0}")]
    FailureRate(f64),

    #[error("minimum work duration {min_ms}ms exceeds maximum {max_ms}ms")]
    WorkRange { min_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone, Parser)]
#[command(name = "taskpool", version, about = "In-memory task queue with a bounded worker pool")]
pub struct Config {
    /// Number of concurrent workers
    #[arg(long, env = "WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Admission queue capacity
    #[arg(long, env = "QUEUE_SIZE", default_value_t = 64)]
    pub queue_size: usize,

    /// Address to bind the HTTP listener to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the HTTP listener to
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Backoff time unit in milliseconds; retry n waits about 2^n units
    #[arg(long, env = "BACKOFF_UNIT_MS", default_value_t = 1000)]
    pub backoff_unit_ms: u64,

    /// Probability that a simulated task attempt fails
    #[arg(long, env = "FAILURE_RATE", default_value_t = 0.2)]
    pub failure_rate: f64,

    /// Lower bound of simulated work duration in milliseconds
    #[arg(long, env = "MIN_WORK_MS", default_value_t = 100)]
    pub min_work_ms: u64,

    /// Upper bound (exclusive) of simulated work duration in milliseconds
    #[arg(long, env = "MAX_WORK_MS", default_value_t = 500)]
    pub max_work_ms: u64,

    /// Seconds to wait for open HTTP connections on shutdown
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub shutdown_timeout_secs: u64,
}

impl Config {
    /// Rejects combinations clap cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(ConfigError::FailureRate(self.failure_rate));
        }
        if self.min_work_ms > self.max_work_ms {
            return Err(ConfigError::WorkRange {
                min_ms: self.min_work_ms,
                max_ms: self.max_work_ms,
            });
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queue_capacity: self.queue_size,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn work_duration(&self) -> Range<Duration> {
        Duration::from_millis(self.min_work_ms)..Duration::from_millis(self.max_work_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
