//! Error types used by stages, workers and pools.
//!
//! This module defines two main error enums:
//!
//! - [`StageError`]: failures of a single worker execution. These end up inside a
//!   [`WorkerContext`](crate::WorkerContext) and travel through failure events.
//! - [`PoolError`]: errors raised by the pool machinery itself (admission after
//!   shutdown, bounded-join timeouts, missing runtime).
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a worker execution.
///
/// A worker returns `Err(StageError)` to signal failure; panics are caught and turned
/// into [`StageError::Panicked`]. The error is stored on the worker context and
/// reported through the owning stage as a failure event.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// Worker failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable error (should not be retried).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Worker panicked; the panic was caught at the execution boundary.
    #[error("worker panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// The pool refused or dropped the work (shutdown in progress).
    #[error("work discarded by pool {pool}")]
    Rejected {
        /// Name of the pool that discarded the work.
        pool: String,
    },

    /// An interruptible wait was interrupted by pool shutdown.
    #[error("interrupted by shutdown")]
    Interrupted,

    /// The retry policy refused another attempt.
    #[error("retries exhausted after {retries} attempts")]
    RetriesExhausted {
        /// Retry count reached by the context.
        retries: u32,
    },
}

impl StageError {
    /// Shorthand for [`StageError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        StageError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`StageError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        StageError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use stagevisor::StageError;
    ///
    /// let err = StageError::fail("boom");
    /// assert_eq!(err.as_label(), "stage_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StageError::Fail { .. } => "stage_failed",
            StageError::Fatal { .. } => "stage_fatal",
            StageError::Panicked { .. } => "stage_panicked",
            StageError::Rejected { .. } => "stage_rejected",
            StageError::Interrupted => "stage_interrupted",
            StageError::RetriesExhausted { .. } => "stage_retries_exhausted",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            StageError::Fail { error } => format!("error: {error}"),
            StageError::Fatal { error } => format!("fatal: {error}"),
            StageError::Panicked { info } => format!("panic: {info}"),
            StageError::Rejected { pool } => format!("rejected by {pool}"),
            StageError::Interrupted => "interrupted".to_string(),
            StageError::RetriesExhausted { retries } => format!("retries exhausted: {retries}"),
        }
    }

    /// Indicates whether a failed context carrying this error may be resubmitted.
    ///
    /// Returns `true` for [`StageError::Fail`], [`StageError::Panicked`] and
    /// [`StageError::Interrupted`], `false` otherwise.
    ///
    /// # Example
    /// ```
    /// use stagevisor::StageError;
    ///
    /// assert!(StageError::fail("boom").is_retryable());
    /// assert!(!StageError::fatal("nope").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StageError::Fail { .. } | StageError::Panicked { .. } | StageError::Interrupted
        )
    }

    /// Renders a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let info = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        StageError::Panicked { info }
    }
}

/// # Errors produced by pool machinery.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool is shutting down and accepts no more work.
    #[error("pool {pool} is shutting down")]
    ShuttingDown {
        /// Pool name.
        pool: String,
    },

    /// A worker execution did not exit within the join timeout and was abandoned.
    #[error("pool {pool}: thread {thread} did not exit within {timeout:?}; abandoning")]
    JoinTimeout {
        /// Pool name.
        pool: String,
        /// The configured join timeout.
        timeout: Duration,
        /// Name (or id) of the abandoned thread.
        thread: String,
    },

    /// `SharedPool::current` was called outside of a tokio runtime.
    #[error("no tokio runtime is available on this thread")]
    NoRuntime,
}

impl PoolError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::ShuttingDown { .. } => "pool_shutting_down",
            PoolError::JoinTimeout { .. } => "pool_join_timeout",
            PoolError::NoRuntime => "pool_no_runtime",
        }
    }
}
