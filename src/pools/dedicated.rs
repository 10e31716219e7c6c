//! # Pool with its own worker threads.
//!
//! [`DedicatedPool`] owns named OS threads fed by an unbounded crossbeam channel.
//!
//! ## Sizing
//! - `min_threads` are started eagerly and never retire.
//! - When queued work outnumbers idle threads, another thread is spawned, up to
//!   `max_threads`.
//! - Threads above `min_threads` retire after `keep_alive` without work.
//! - A thread lost to a panic gives its slot back and is replaced while work is
//!   queued.
//!
//! ## Shutdown
//! ```text
//! shutdown()
//!   ├─► close the queue (later enqueues are rejected)
//!   ├─► coordinator sweep: cancel → interrupt → bounded join → abandon
//!   ├─► queued, never started contexts are rejected through the exception channel
//!   └─► join every worker thread that was not abandoned (and is not the caller)
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::core::PoolConfig;
use crate::core::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::pools::channel::{Backend, ExceptionChannel, Job, reject};
use crate::pools::pool::{ExceptionHandler, StagePool};
use crate::stages::WorkerContext;

/// Thread accounting shared with the worker threads.
struct Workers {
    live: AtomicUsize,
    idle: AtomicUsize,
    min: AtomicUsize,
    max: AtomicUsize,
}

impl Workers {
    /// Claims a slot for a new thread if below `max`.
    fn try_reserve(&self) -> bool {
        let max = self.max.load(Ordering::SeqCst);
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < max).then_some(live + 1)
            })
            .is_ok()
    }

    /// Releases a slot if above `min`.
    fn try_retire(&self) -> bool {
        let min = self.min.load(Ordering::SeqCst);
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live > min).then(|| live - 1)
            })
            .is_ok()
    }
}

/// Pool owning its worker threads.
pub struct DedicatedPool<P: Send + Sync + 'static> {
    name: RwLock<String>,
    workers: Arc<Workers>,
    keep_alive: Duration,
    sender: Mutex<Option<Sender<Job<P>>>>,
    receiver: Receiver<Job<P>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_thread: AtomicUsize,
    coordinator: Arc<ShutdownCoordinator>,
    channel: ExceptionChannel<P>,
    me: Weak<Self>,
}

impl<P: Send + Sync + 'static> DedicatedPool<P> {
    /// Creates the pool and starts `min_threads` workers.
    pub fn new(cfg: &PoolConfig) -> Arc<Self> {
        let (tx, rx) = channel::unbounded();
        let pool = Arc::new_cyclic(|me| Self {
            name: RwLock::new(cfg.name.clone()),
            workers: Arc::new(Workers {
                live: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                min: AtomicUsize::new(cfg.thread_floor()),
                max: AtomicUsize::new(cfg.thread_limit()),
            }),
            keep_alive: cfg.keep_alive_clamped(),
            sender: Mutex::new(Some(tx)),
            receiver: rx,
            threads: Mutex::new(Vec::new()),
            next_thread: AtomicUsize::new(0),
            coordinator: ShutdownCoordinator::new(cfg.name.clone(), cfg.join_timeout),
            channel: ExceptionChannel::new(),
            me: me.clone(),
        });
        pool.fill();
        info!(
            pool = %cfg.name,
            min = cfg.thread_floor(),
            max = cfg.thread_limit(),
            "pool started"
        );
        pool
    }

    /// Worker threads currently alive.
    pub fn live_threads(&self) -> usize {
        self.workers.live.load(Ordering::SeqCst)
    }

    /// Contexts waiting for a thread.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Starts threads until `min_threads` are alive.
    fn fill(&self) {
        while self.workers.live.load(Ordering::SeqCst) < self.workers.min.load(Ordering::SeqCst) {
            if !self.workers.try_reserve() || !self.spawn_worker() {
                break;
            }
        }
    }

    /// Spawns a thread when the backlog exceeds the idle threads, or when queued
    /// work has no thread at all.
    fn grow(&self) {
        if self.is_shutting_down() {
            return;
        }
        let backlog = self.receiver.len();
        if backlog == 0 {
            return;
        }
        let idle = self.workers.idle.load(Ordering::SeqCst);
        let live = self.workers.live.load(Ordering::SeqCst);
        if (backlog > idle || live == 0) && self.workers.try_reserve() {
            self.spawn_worker();
        }
    }

    /// Spawns one worker; the slot must already be reserved.
    fn spawn_worker(&self) -> bool {
        let idx = self.next_thread.fetch_add(1, Ordering::Relaxed);
        let thread_name = format!("{}-{idx}", self.name());
        let rx = self.receiver.clone();
        let slot = Slot::new(Arc::clone(&self.workers), self.me.clone());
        let keep_alive = self.keep_alive;

        match thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker_loop(rx, slot, keep_alive))
        {
            Ok(handle) => {
                let mut threads = self.threads.lock();
                threads.retain(|h| !h.is_finished());
                threads.push(handle);
                debug!(pool = %self.name(), thread = %thread_name, "worker spawned");
                true
            }
            // The unspawned closure was dropped and its slot released.
            Err(e) => {
                error!(pool = %self.name(), error = %e, "failed to spawn worker thread");
                false
            }
        }
    }
}

/// A worker thread's reserved slot in [`Workers::live`].
///
/// Released when the thread exits, including by unwinding. A thread lost to a panic
/// is replaced if work is still queued.
struct Slot<P: Send + Sync + 'static> {
    workers: Arc<Workers>,
    pool: Weak<DedicatedPool<P>>,
    held: bool,
}

impl<P: Send + Sync + 'static> Slot<P> {
    fn new(workers: Arc<Workers>, pool: Weak<DedicatedPool<P>>) -> Self {
        Self {
            workers,
            pool,
            held: true,
        }
    }

    /// Gives the slot back if the pool is above `min`.
    fn retire(&mut self) -> bool {
        if self.held && self.workers.try_retire() {
            self.held = false;
        }
        !self.held
    }

    /// Spawns a replacement if queued work was left without a thread.
    fn backfill(&self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.grow();
        }
    }
}

impl<P: Send + Sync + 'static> Drop for Slot<P> {
    fn drop(&mut self) {
        if self.held {
            self.workers.live.fetch_sub(1, Ordering::SeqCst);
        }
        if thread::panicking() {
            error!("worker thread panicked");
            self.backfill();
        }
    }
}

fn worker_loop<P: Send + Sync + 'static>(rx: Receiver<Job<P>>, mut slot: Slot<P>, keep_alive: Duration) {
    let workers = Arc::clone(&slot.workers);
    loop {
        workers.idle.fetch_add(1, Ordering::SeqCst);
        let next = rx.recv_timeout(keep_alive);
        workers.idle.fetch_sub(1, Ordering::SeqCst);

        match next {
            Ok(job) => job.run(),
            Err(RecvTimeoutError::Timeout) => {
                if slot.retire() {
                    debug!("idle worker retired");
                    // An enqueue may have counted this thread as idle while it retired.
                    if !rx.is_empty() {
                        slot.backfill();
                    }
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

impl<P: Send + Sync + 'static> StagePool<P> for DedicatedPool<P> {
    fn name(&self) -> String {
        self.name.read().clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
        self.coordinator.set_name(name);
    }

    fn min_threads(&self) -> usize {
        self.workers.min.load(Ordering::SeqCst)
    }

    fn set_min_threads(&self, n: usize) {
        let n = n.min(self.max_threads());
        self.workers.min.store(n, Ordering::SeqCst);
        if !self.is_shutting_down() {
            self.fill();
        }
    }

    fn max_threads(&self) -> usize {
        self.workers.max.load(Ordering::SeqCst)
    }

    /// Lowering the cap does not stop running threads; excess ones retire when idle.
    fn set_max_threads(&self, n: usize) {
        let n = n.max(1);
        self.workers.max.store(n, Ordering::SeqCst);
        if self.min_threads() > n {
            self.workers.min.store(n, Ordering::SeqCst);
        }
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
        let sent = match self.sender.lock().as_ref() {
            Some(tx) => tx.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        };
        match sent {
            Ok(()) => self.grow(),
            // Dropped outside the lock: the job rejects itself.
            Err(job) => drop(job),
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.coordinator.is_shutting_down()
    }

    fn shutdown(&self) -> ShutdownReport {
        drop(self.sender.lock().take());

        let report = self.coordinator.shutdown();
        if report.already_shutting_down {
            return report;
        }

        let name = self.name();
        let mut discarded = 0usize;
        while let Ok(job) = self.receiver.try_recv() {
            drop(job);
            discarded += 1;
        }
        if discarded > 0 {
            warn!(pool = %name, discarded, "queued work discarded");
        }

        let me = thread::current().id();
        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            let id = handle.thread().id();
            if id == me || report.abandoned.contains(&id) {
                continue;
            }
            if handle.join().is_err() {
                error!(pool = %name, "worker thread panicked");
            }
        }
        info!(pool = %name, "pool stopped");
        report
    }
}

impl<P: Send + Sync + 'static> Backend<P> for DedicatedPool<P> {
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

impl<P: Send + Sync + 'static> Drop for DedicatedPool<P> {
    fn drop(&mut self) {
        // Idle workers see the disconnect once the queue is empty and exit.
        self.sender.get_mut().take();
    }
}
