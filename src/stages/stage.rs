//! # Stage: the dispatch engine.
//!
//! A [`Stage`] owns a worker, an ordered set of listeners and an optional pool.
//!
//! ## Push
//! ```text
//! push(event) ──► WorkerContext{worker, event, retry_count: 0}
//!     ├─ no pool │ run_in_caller_context │ event.run_synchronous
//!     │     └─► invoke on this thread ── Err/panic ──► fire(Event::failure(ctx)) ──► return
//!     └─ otherwise
//!           └─► pool.enqueue(ctx) ──► return
//!                  └─ (pool thread) Err/panic ──► exception channel ──► fire(Event::failure(ctx))
//! ```
//!
//! ## Fire
//! Listeners run in a direct loop on the firing thread, on a snapshot taken under the
//! listener lock: registration order, or sorted by the configured [`ListenerOrder`].
//! The first listener error stops the loop and is returned.
//!
//! ## Failures
//! A failed context is fired through this stage's own listeners as an
//! [`EventKind::Failure`](crate::EventKind::Failure). A failure while reporting a
//! failure (a failure listener erring or panicking, or a worker failing on a failure
//! event) is logged and dropped.
//!
//! ## Chaining
//! `Stage` implements [`Listen`]: registering stage B on stage A makes A's fired
//! events be pushed into B.

use std::cmp::Ordering;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::core::StageConfig;
use crate::core::shutdown::ShutdownReport;
use crate::error::StageError;
use crate::events::Event;
use crate::listeners::{Listen, ListenerId, ListenerOrder, ListenerRef, ListenerSet, addr_of};
use crate::policies::RetryPolicy;
use crate::pools::{PoolRef, StagePool};
use crate::stages::builder::StageBuilder;
use crate::stages::context::WorkerContext;
use crate::stages::worker::WorkerRef;

/// A processing stage.
pub struct Stage<P> {
    name: String,
    worker: WorkerRef<P>,
    listeners: ListenerSet<P>,
    order: RwLock<Option<ListenerOrder>>,
    run_in_caller_context: AtomicBool,
    retry: RetryPolicy,
    pool: RwLock<Option<PoolRef<P>>>,
    me: Weak<Self>,
}

impl<P> Stage<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker(&self) -> &WorkerRef<P> {
        &self.worker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// `true` if pushed events always run on the pushing thread.
    pub fn run_in_caller_context(&self) -> bool {
        self.run_in_caller_context.load(AtomicOrdering::SeqCst)
    }

    pub fn set_run_in_caller_context(&self, value: bool) {
        self.run_in_caller_context.store(value, AtomicOrdering::SeqCst);
    }

    /// Sets (or clears) the comparator used by [`Stage::fire`].
    pub fn set_order(&self, order: Option<ListenerOrder>) {
        *self.order.write() = order;
    }

    /// The assigned pool, if any.
    pub fn pool(&self) -> Option<PoolRef<P>> {
        self.pool.read().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_registered<L: Listen<P> + ?Sized>(&self, listener: &Arc<L>) -> bool {
        self.listeners.contains(addr_of(listener))
    }

    /// Snapshot of the listeners in registration order.
    pub fn listeners(&self) -> Vec<ListenerRef<P>> {
        self.listeners.snapshot()
    }
}

impl<P: Send + Sync + 'static> Stage<P> {
    /// Creates a stage with the default configuration and no pool.
    pub fn new(worker: WorkerRef<P>) -> Arc<Self> {
        Self::builder(worker).build()
    }

    /// Starts building a stage around `worker`.
    pub fn builder(worker: WorkerRef<P>) -> StageBuilder<P> {
        StageBuilder::new(worker)
    }

    pub(crate) fn from_config(
        worker: WorkerRef<P>,
        cfg: StageConfig,
        order: Option<ListenerOrder>,
    ) -> Arc<Self> {
        let name = cfg.name.unwrap_or_else(|| worker.name().to_string());
        Arc::new_cyclic(|me| Self {
            name,
            worker,
            listeners: ListenerSet::new(),
            order: RwLock::new(order),
            run_in_caller_context: AtomicBool::new(cfg.run_in_caller_context),
            retry: cfg.retry,
            pool: RwLock::new(None),
            me: me.clone(),
        })
    }

    /// Adds a listener; a listener already registered is left as is.
    ///
    /// Returns `true` if the listener was added.
    pub fn register(&self, listener: ListenerRef<P>) -> bool {
        let id = ListenerId::of(&listener);
        let added = self.listeners.insert(listener);
        if added {
            info!(stage = %self.name, listener = %id, "listener registered");
        }
        added
    }

    /// Removes a listener; returns `true` if it was registered.
    pub fn unregister<L: Listen<P> + ?Sized>(&self, listener: &Arc<L>) -> bool {
        let removed = self.listeners.remove(addr_of(listener));
        if removed {
            info!(stage = %self.name, listener = %listener.name(), "listener unregistered");
        }
        removed
    }

    /// Listeners that are themselves stages.
    pub fn observing_stages(&self) -> Vec<Arc<Stage<P>>> {
        self.listeners
            .snapshot()
            .into_iter()
            .filter_map(|l| l.into_stage())
            .collect()
    }

    /// Invokes every listener with `(self, event)`.
    ///
    /// Uses the configured comparator if one is set, registration order otherwise.
    /// The first listener error stops the fan-out and is returned.
    pub fn fire(&self, event: impl Into<Arc<Event<P>>>) -> Result<(), StageError> {
        let event = event.into();
        let order = self.order.read().clone();
        let listeners = match order {
            Some(order) => self.sorted(|a, b| order(a, b)),
            None => self.listeners.snapshot(),
        };
        self.dispatch(&event, &listeners)
    }

    /// Like [`Stage::fire`], with a one-shot comparator instead of the configured one.
    pub fn fire_with<F>(&self, event: impl Into<Arc<Event<P>>>, cmp: F) -> Result<(), StageError>
    where
        F: Fn(&ListenerId, &ListenerId) -> Ordering,
    {
        let event = event.into();
        let listeners = self.sorted(cmp);
        self.dispatch(&event, &listeners)
    }

    /// Runs the worker on `event`, inline or on the pool (see module docs).
    pub fn push(&self, event: impl Into<Arc<Event<P>>>) {
        let ctx = WorkerContext::from_parts(self.me.clone(), Arc::clone(&self.worker), event.into());
        self.route(ctx);
    }

    /// Resubmits failed work: same worker and event, `retry_count + 1`, no error.
    ///
    /// The resubmission is routed like a push and waits the policy's backoff before
    /// the worker runs.
    ///
    /// # Errors
    /// - the context's error is not retryable (returned as is);
    /// - [`StageError::RetriesExhausted`] once the retry policy refuses another attempt.
    pub fn retry(&self, ctx: &WorkerContext<P>) -> Result<(), StageError> {
        if let Some(err) = ctx.error().filter(|e| !e.is_retryable()) {
            warn!(stage = %self.name, label = err.as_label(), "not retrying: {err}");
            return Err(err.clone());
        }

        let retries = ctx.retry_count();
        if !self.retry.allows(retries) {
            let err = StageError::RetriesExhausted { retries };
            warn!(stage = %self.name, ctx = %ctx, "{err}");
            return Err(err);
        }

        let next = ctx.next_attempt(self.retry.delay_for(retries));
        info!(stage = %self.name, retry_count = next.retry_count(), "resubmitting");
        self.route(next);
        Ok(())
    }

    /// Assigns the pool used for asynchronous pushes.
    ///
    /// The pool is renamed `"<stage>TP"` and its failures are fired through this
    /// stage. A pool instance serves a single stage.
    pub fn set_pool(&self, pool: PoolRef<P>) {
        pool.set_name(&format!("{}TP", self.name));

        let stage = self.me.clone();
        pool.subscribe(Arc::new(move |pool: &dyn StagePool<P>, ctx: WorkerContext<P>| {
            match stage.upgrade() {
                Some(stage) => stage.report_failure(ctx),
                None => warn!(pool = %pool.name(), ctx = %ctx, "stage dropped, failure discarded"),
            }
        }));

        info!(stage = %self.name, pool = %pool.name(), "pool assigned");
        *self.pool.write() = Some(pool);
    }

    /// Shuts the assigned pool down; `None` without a pool.
    pub fn shutdown(&self) -> Option<ShutdownReport> {
        let pool = self.pool()?;
        info!(stage = %self.name, pool = %pool.name(), "shutting down");
        Some(pool.shutdown())
    }

    fn route(&self, ctx: WorkerContext<P>) {
        let pool = if ctx.event().run_synchronous || self.run_in_caller_context() {
            None
        } else {
            self.pool()
        };

        match pool {
            Some(pool) => {
                debug!(stage = %self.name, event = %ctx.event(), "enqueued");
                pool.enqueue(ctx);
            }
            None => self.run_inline(ctx),
        }
    }

    fn run_inline(&self, mut ctx: WorkerContext<P>) {
        debug!(stage = %self.name, event = %ctx.event(), "running inline");
        if let Err(err) = ctx.invoke() {
            error!(
                stage = %self.name,
                worker = %ctx.worker().name(),
                label = err.as_label(),
                "{err}"
            );
            self.report_failure(ctx);
        }
    }

    /// Fires the failure event for `ctx` through this stage's listeners.
    pub(crate) fn report_failure(&self, ctx: WorkerContext<P>) {
        if ctx.event().is_failure() {
            error!(stage = %self.name, ctx = %ctx, "failure while handling a failure, dropped");
            return;
        }

        debug!(stage = %self.name, ctx = %ctx, "firing failure");
        let event = Arc::new(Event::failure(ctx));
        let err = match catch_unwind(AssertUnwindSafe(|| self.fire(Arc::clone(&event)))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(panic_err) => StageError::from_panic(&*panic_err),
        };
        error!(
            stage = %self.name,
            label = err.as_label(),
            event = %event,
            "failure listener failed, dropped: {err}"
        );
    }

    fn sorted<F>(&self, cmp: F) -> Vec<ListenerRef<P>>
    where
        F: Fn(&ListenerId, &ListenerId) -> Ordering,
    {
        let mut keyed: Vec<(ListenerId, ListenerRef<P>)> = self
            .listeners
            .snapshot()
            .into_iter()
            .map(|l| (ListenerId::of(&l), l))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| cmp(a, b));
        keyed.into_iter().map(|(_, l)| l).collect()
    }

    fn dispatch(&self, event: &Arc<Event<P>>, listeners: &[ListenerRef<P>]) -> Result<(), StageError> {
        if listeners.is_empty() {
            return Ok(());
        }
        debug!(stage = %self.name, event = %event, listeners = listeners.len(), "firing");
        for listener in listeners {
            listener.on_event(self, event)?;
        }
        Ok(())
    }
}

impl<P: Send + Sync + 'static> Listen<P> for Stage<P> {
    /// Pushes the incoming event into this stage.
    fn on_event(&self, _source: &Stage<P>, event: &Arc<Event<P>>) -> Result<(), StageError> {
        self.push(Arc::clone(event));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn into_stage(self: Arc<Self>) -> Option<Arc<Stage<P>>> {
        Some(self)
    }
}
