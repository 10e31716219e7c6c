//! # Stage and pool configuration.
//!
//! [`StageConfig`] defines how a stage dispatches pushed events and how far it lets
//! failed work be retried; [`PoolConfig`] sizes a pool backend and bounds its
//! shutdown.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use stagevisor::{PoolConfig, RetryPolicy, StageConfig};
//!
//! let mut stage = StageConfig::default();
//! stage.name = Some("ingest".into());
//! stage.retry = RetryPolicy::immediate(5);
//!
//! let mut pool = PoolConfig::default();
//! pool.min_threads = 1;
//! pool.max_threads = 4;
//! pool.join_timeout = Duration::from_secs(2);
//!
//! assert_eq!(pool.thread_limit(), 4);
//! assert!(!stage.run_in_caller_context);
//! ```

use std::thread;
use std::time::Duration;

use crate::policies::RetryPolicy;

/// Configuration of a single stage.
#[derive(Clone, Debug, Default)]
pub struct StageConfig {
    /// Stage name (`None` = the worker's name).
    pub name: Option<String>,
    /// Run every pushed event on the pushing thread, even when a pool is set.
    pub run_in_caller_context: bool,
    /// Bounds for [`Stage::retry`](crate::Stage::retry).
    pub retry: RetryPolicy,
}

/// Configuration of a pool backend.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Pool name (renamed to `"<stage>TP"` when assigned to a stage).
    pub name: String,
    /// Threads kept alive while idle.
    pub min_threads: usize,
    /// Upper bound on worker threads (0 = available parallelism).
    pub max_threads: usize,
    /// Maximum wait for each tracked execution during shutdown.
    pub join_timeout: Duration,
    /// Idle time after which a thread above `min_threads` retires.
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    /// Provides a default configuration:
    /// - `name = "StagePool"`
    /// - `min_threads = 1`
    /// - `max_threads = 0` (available parallelism)
    /// - `join_timeout = 30s`
    /// - `keep_alive = 60s`
    fn default() -> Self {
        Self {
            name: "StagePool".to_string(),
            min_threads: 1,
            max_threads: 0,
            join_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Config with the given name and default sizing.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Effective thread cap (at least 1).
    pub fn thread_limit(&self) -> usize {
        let max = if self.max_threads == 0 {
            thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.max_threads
        };
        max.max(1)
    }

    /// Effective minimum (never above the cap).
    pub fn thread_floor(&self) -> usize {
        self.min_threads.min(self.thread_limit())
    }

    pub(crate) fn keep_alive_clamped(&self) -> Duration {
        self.keep_alive.max(Duration::from_millis(10))
    }
}
