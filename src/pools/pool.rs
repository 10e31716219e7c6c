//! # Pool contract.
//!
//! A [`StagePool`] accepts [`WorkerContext`]s and runs them "eventually, on some
//! thread". It never blocks the caller for completion: the callback runs, or its
//! failure (including refusal during shutdown) is surfaced to the subscribed
//! [`ExceptionHandler`]s.
//!
//! Backends are injected into stages as [`PoolRef`]; the stage only sees this trait.

use std::sync::Arc;

use crate::core::shutdown::ShutdownReport;
use crate::stages::WorkerContext;

/// Shared handle to a pool backend.
pub type PoolRef<P> = Arc<dyn StagePool<P>>;

/// Exception notification: invoked with the pool and the failed context.
pub type ExceptionHandler<P> = Arc<dyn Fn(&dyn StagePool<P>, WorkerContext<P>) + Send + Sync>;

/// Contract for worker pools.
///
/// Thread counts are backend-defined: a dedicated pool enforces them, a shared pool
/// treats them as hints.
pub trait StagePool<P>: Send + Sync + 'static {
    /// Pool name, used in thread names and logs.
    fn name(&self) -> String;

    /// Renames the pool. Fixed-identity backends ignore it.
    fn set_name(&self, name: &str);

    fn min_threads(&self) -> usize;

    fn set_min_threads(&self, n: usize);

    fn max_threads(&self) -> usize;

    fn set_max_threads(&self, n: usize);

    /// Adds an exception handler.
    fn subscribe(&self, handler: ExceptionHandler<P>);

    /// Schedules the context; returns without waiting for it to run.
    fn enqueue(&self, ctx: WorkerContext<P>);

    /// `true` once [`StagePool::shutdown`] has begun.
    fn is_shutting_down(&self) -> bool;

    /// Stops accepting work and waits (bounded) for in-flight work.
    fn shutdown(&self) -> ShutdownReport;
}
