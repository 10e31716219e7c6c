//! Retry and backoff policies.
//!
//! This module groups the knobs that control **whether** failed work is resubmitted
//! and **how long** it waits before running again.
//!
//! ## Contents
//! - [`RetryPolicy`]   how many resubmissions a stage allows
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid retry storms
//!
//! ## Quick wiring
//! ```text
//! StageConfig { retry: RetryPolicy { max_retries, backoff } }
//!      └─► Stage::retry(&ctx):
//!           - retry.allows(ctx.retry_count()) decides resubmit/refuse
//!           - retry.delay_for(ctx.retry_count()) is waited before the worker runs again
//! ```
//!
//! ## Defaults
//! - `RetryPolicy::default()` → max_retries=3.
//! - `BackoffPolicy::default()` → first=100ms, factor=2.0, max=10s, jitter=None.

mod backoff;
mod retry;

pub use backoff::{BackoffPolicy, JitterPolicy};
pub use retry::RetryPolicy;
