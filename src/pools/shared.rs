//! # Pool backed by a shared tokio runtime.
//!
//! [`SharedPool`] runs contexts on the blocking thread pool of a tokio runtime the
//! application already owns (`Handle::spawn_blocking`). The runtime is process-wide
//! infrastructure, so the pool has a fixed identity: it keeps its name, treats
//! min/max as hints and never shuts the runtime down. Its own
//! [`ShutdownCoordinator`] still tracks and bounds the executions it admitted.
//!
//! Give each stage its own `SharedPool` instance: exception notifications go to every
//! subscriber of an instance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tracing::debug;

use crate::core::PoolConfig;
use crate::core::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::error::PoolError;
use crate::pools::channel::{Backend, ExceptionChannel, Job, reject};
use crate::pools::pool::{ExceptionHandler, StagePool};
use crate::stages::WorkerContext;

const SHARED_POOL_NAME: &str = "SharedPool";

/// Pool running on a shared tokio runtime's blocking threads.
pub struct SharedPool<P> {
    handle: Handle,
    min_threads: AtomicUsize,
    max_threads: AtomicUsize,
    coordinator: Arc<ShutdownCoordinator>,
    channel: ExceptionChannel<P>,
    me: Weak<Self>,
}

impl<P: Send + Sync + 'static> SharedPool<P> {
    /// Creates a pool on the given runtime; `cfg.name` is ignored.
    pub fn new(handle: Handle, cfg: &PoolConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            handle,
            min_threads: AtomicUsize::new(cfg.thread_floor()),
            max_threads: AtomicUsize::new(cfg.thread_limit()),
            coordinator: ShutdownCoordinator::new(SHARED_POOL_NAME, cfg.join_timeout),
            channel: ExceptionChannel::new(),
            me: me.clone(),
        })
    }

    /// Creates a pool on the runtime of the calling context.
    ///
    /// Fails with [`PoolError::NoRuntime`] outside a tokio runtime.
    pub fn current(cfg: &PoolConfig) -> Result<Arc<Self>, PoolError> {
        let handle = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        Ok(Self::new(handle, cfg))
    }

    /// Executions currently running.
    pub fn live(&self) -> usize {
        self.coordinator.live()
    }
}

impl<P: Send + Sync + 'static> StagePool<P> for SharedPool<P> {
    fn name(&self) -> String {
        SHARED_POOL_NAME.to_string()
    }

    fn set_name(&self, name: &str) {
        debug!(pool = SHARED_POOL_NAME, requested = name, "shared pool keeps its name");
    }

    fn min_threads(&self) -> usize {
        self.min_threads.load(Ordering::Relaxed)
    }

    fn set_min_threads(&self, n: usize) {
        self.min_threads.store(n, Ordering::Relaxed);
    }

    fn max_threads(&self) -> usize {
        self.max_threads.load(Ordering::Relaxed)
    }

    fn set_max_threads(&self, n: usize) {
        self.max_threads.store(n.max(1), Ordering::Relaxed);
    }

    fn subscribe(&self, handler: ExceptionHandler<P>) {
        self.channel.subscribe(handler);
    }

    fn enqueue(&self, ctx: WorkerContext<P>) {
        if self.coordinator.is_shutting_down() {
            reject(self, ctx);
            return;
        }
        let Some(me) = self.me.upgrade() else {
            reject(self, ctx);
            return;
        };
        let job = Job::new(me, ctx);
        // A runtime that is shutting down drops the closure; the job rejects itself.
        let _ = self.handle.spawn_blocking(move || job.run());
    }

    fn is_shutting_down(&self) -> bool {
        self.coordinator.is_shutting_down()
    }

    fn shutdown(&self) -> ShutdownReport {
        self.coordinator.shutdown()
    }
}

impl<P: Send + Sync + 'static> Backend<P> for SharedPool<P> {
    fn channel(&self) -> &ExceptionChannel<P> {
        &self.channel
    }

    fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    fn as_pool(&self) -> &dyn StagePool<P> {
        self
    }
}
