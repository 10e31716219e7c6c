//! # Retry policy for failed worker contexts.
//!
//! [`RetryPolicy`] bounds how many times [`Stage::retry`](crate::Stage::retry)
//! resubmits the same work and how long each resubmission waits.
//!
//! ```text
//! retry_count:   0 (first run) ──fail──► retry(ctx) ──► 1 ──fail──► ... ──► max_retries
//! allows(n):     n < max_retries                                          └─► RetriesExhausted
//! delay_for(n):  backoff.next(n)
//! ```

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Retry policy of a stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of resubmissions of one piece of work.
    pub max_retries: u32,
    /// Delay between resubmissions.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    /// Three retries with the default backoff.
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Policy refusing every retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffPolicy::immediate(),
        }
    }

    /// Policy allowing `max_retries` immediate resubmissions.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: BackoffPolicy::immediate(),
        }
    }

    /// `true` if a context that has been retried `retry_count` times may be retried again.
    #[inline]
    pub fn allows(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Wait before resubmitting a context that has been retried `retry_count` times.
    #[inline]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.backoff.next(retry_count)
    }
}
