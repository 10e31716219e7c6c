use std::cmp::Ordering;
use std::sync::Arc;

use crate::core::StageConfig;
use crate::listeners::{ListenerId, ListenerOrder, ListenerRef};
use crate::policies::RetryPolicy;
use crate::pools::PoolRef;
use crate::stages::Stage;
use crate::stages::worker::WorkerRef;

/// Builder for constructing a [`Stage`] with optional pool, listeners and ordering.
pub struct StageBuilder<P> {
    worker: WorkerRef<P>,
    cfg: StageConfig,
    pool: Option<PoolRef<P>>,
    order: Option<ListenerOrder>,
    listeners: Vec<ListenerRef<P>>,
}

impl<P: Send + Sync + 'static> StageBuilder<P> {
    /// Creates a new builder around the stage's worker.
    pub fn new(worker: WorkerRef<P>) -> Self {
        Self {
            worker,
            cfg: StageConfig::default(),
            pool: None,
            order: None,
            listeners: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, cfg: StageConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Names the stage (defaults to the worker's name).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.cfg.name = Some(name.into());
        self
    }

    /// Runs every pushed event on the pushing thread, even with a pool.
    pub fn run_in_caller_context(mut self, value: bool) -> Self {
        self.cfg.run_in_caller_context = value;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.cfg.retry = retry;
        self
    }

    /// Assigns the pool for asynchronous pushes (see [`Stage::set_pool`]).
    pub fn with_pool(mut self, pool: PoolRef<P>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Orders listener invocation in [`Stage::fire`].
    pub fn with_order<F>(mut self, cmp: F) -> Self
    where
        F: Fn(&ListenerId, &ListenerId) -> Ordering + Send + Sync + 'static,
    {
        self.order = Some(Arc::new(cmp));
        self
    }

    /// Listeners registered at build time, in order.
    pub fn with_listeners(mut self, listeners: Vec<ListenerRef<P>>) -> Self {
        self.listeners = listeners;
        self
    }

    /// Builds the stage, registers the listeners and assigns the pool.
    pub fn build(self) -> Arc<Stage<P>> {
        let stage = Stage::from_config(self.worker, self.cfg, self.order);
        for listener in self.listeners {
            stage.register(listener);
        }
        if let Some(pool) = self.pool {
            stage.set_pool(pool);
        }
        stage
    }
}
