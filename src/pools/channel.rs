//! # Execution trampoline shared by pool backends.
//!
//! Every backend runs a context the same way:
//!
//! ```text
//! Job::run
//!   ├─ coordinator.enter()  ── Err ──► reject: Rejected{pool} ──► notify
//!   ├─ ctx.invoke()          ── Err/panic ──► log (error) ──► notify
//!   └─ guard dropped (after notify, so failure reporting is tracked too)
//!
//! Job dropped without running (queue drained, runtime gone) ──► reject
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::core::shutdown::ShutdownCoordinator;
use crate::error::StageError;
use crate::pools::pool::{ExceptionHandler, StagePool};
use crate::stages::WorkerContext;

/// Subscribers of a pool's exception notifications.
pub(crate) struct ExceptionChannel<P> {
    handlers: RwLock<Vec<ExceptionHandler<P>>>,
}

impl<P: Send + Sync + 'static> ExceptionChannel<P> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, handler: ExceptionHandler<P>) {
        self.handlers.write().push(handler);
    }

    /// Hands the failed context to every handler (outside the lock).
    pub(crate) fn notify(&self, pool: &dyn StagePool<P>, ctx: WorkerContext<P>) {
        let handlers = self.handlers.read().clone();
        let Some((last, rest)) = handlers.split_last() else {
            error!(pool = %pool.name(), ctx = %ctx, "no exception handler, failure dropped");
            return;
        };
        for handler in rest {
            call(pool, handler, ctx.clone());
        }
        call(pool, last, ctx);
    }
}

fn call<P: Send + Sync + 'static>(
    pool: &dyn StagePool<P>,
    handler: &ExceptionHandler<P>,
    ctx: WorkerContext<P>,
) {
    if let Err(panic_err) = catch_unwind(AssertUnwindSafe(|| handler(pool, ctx))) {
        let err = StageError::from_panic(&*panic_err);
        error!(pool = %pool.name(), label = err.as_label(), "exception handler panicked: {err}");
    }
}

/// Internal side of a pool backend used by the trampoline.
pub(crate) trait Backend<P>: StagePool<P> {
    fn channel(&self) -> &ExceptionChannel<P>;

    fn coordinator(&self) -> &Arc<ShutdownCoordinator>;

    fn as_pool(&self) -> &dyn StagePool<P>;
}

/// Runs one context under the backend's coordinator.
pub(crate) fn execute<P: Send + Sync + 'static>(pool: &dyn Backend<P>, mut ctx: WorkerContext<P>) {
    let guard = match pool.coordinator().enter() {
        Ok(guard) => guard,
        Err(_) => {
            reject(pool, ctx);
            return;
        }
    };

    if let Err(err) = ctx.invoke() {
        error!(
            pool = %pool.name(),
            worker = %ctx.worker().name(),
            label = err.as_label(),
            "{err}"
        );
        pool.channel().notify(pool.as_pool(), ctx);
    }
    drop(guard);
}

/// Discards a context that will never run and reports it.
pub(crate) fn reject<P: Send + Sync + 'static>(pool: &dyn Backend<P>, mut ctx: WorkerContext<P>) {
    let name = pool.name();
    warn!(pool = %name, ctx = %ctx, "pool is shutting down, work will be discarded");
    ctx.set_error(StageError::Rejected { pool: name });
    pool.channel().notify(pool.as_pool(), ctx);
}

/// A scheduled context; rejects it if dropped before running.
pub(crate) struct Job<P: Send + Sync + 'static> {
    ctx: Option<WorkerContext<P>>,
    pool: Arc<dyn Backend<P>>,
}

impl<P: Send + Sync + 'static> Job<P> {
    pub(crate) fn new(pool: Arc<dyn Backend<P>>, ctx: WorkerContext<P>) -> Self {
        Self {
            ctx: Some(ctx),
            pool,
        }
    }

    pub(crate) fn run(mut self) {
        if let Some(ctx) = self.ctx.take() {
            execute(&*self.pool, ctx);
        }
    }
}

impl<P: Send + Sync + 'static> Drop for Job<P> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            reject(&*self.pool, ctx);
        }
    }
}
