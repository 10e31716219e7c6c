//! # Graceful shutdown of pool worker executions.
//!
//! [`ShutdownCoordinator`] is owned by a pool backend. It tracks every worker
//! execution it admitted and, on shutdown, brings them down in three steps:
//!
//! ```text
//! shutdown()
//!   ├─► mark shutting down (under the registry lock) + snapshot (registration order)
//!   ├─► cancel the cooperative token            → is_cancelled() turns true everywhere
//!   └─► for each tracked execution (except the calling thread):
//!          ├─ blocked in pause()?  → interrupt (unpark), pause returns Interrupted
//!          ├─ join with join_timeout
//!          └─ timed out            → abandon (drop from registry, log JoinTimeout)
//! ```
//!
//! A thread cannot be killed safely in Rust, so forced termination means
//! abandonment: the coordinator stops waiting and forgets the execution. Callbacks
//! must tolerate being abandoned mid-flight.
//!
//! ## Rules
//! - An execution is registered by [`ShutdownCoordinator::enter`] immediately before
//!   its callback runs and removed when the returned guard drops (success, error or
//!   panic).
//! - `enter` fails once shutdown has begun.
//! - `shutdown` is idempotent: later or concurrent calls return at once with
//!   [`ShutdownReport::already_shutting_down`] set.
//! - The calling thread is never joined against itself.
//!
//! The free functions ([`pause`], [`is_cancelled`], [`is_worker_thread`]) give a
//! running callback access to the execution it belongs to.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, Thread, ThreadId};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{PoolError, StageError};

thread_local! {
    static CURRENT: RefCell<Option<Arc<Execution>>> = const { RefCell::new(None) };
}

/// One tracked worker execution.
struct Execution {
    thread: Thread,
    token: CancellationToken,
    /// Set while the execution waits in [`pause`].
    blocked: AtomicBool,
    done: Mutex<bool>,
    exited: Condvar,
}

impl Execution {
    fn new(thread: Thread, token: CancellationToken) -> Self {
        Self {
            thread,
            token,
            blocked: AtomicBool::new(false),
            done: Mutex::new(false),
            exited: Condvar::new(),
        }
    }

    fn finish(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.exited.notify_all();
    }

    fn is_done(&self) -> bool {
        *self.done.lock()
    }

    /// Waits for the execution to exit; `false` on timeout.
    ///
    /// A timeout too large to be a deadline waits without one.
    fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut done = self.done.lock();
        while !*done {
            match deadline {
                Some(deadline) => {
                    if self.exited.wait_until(&mut done, deadline).timed_out() {
                        return *done;
                    }
                }
                None => self.exited.wait(&mut done),
            }
        }
        true
    }

    fn thread_label(&self) -> String {
        match self.thread.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", self.thread.id()),
        }
    }
}

/// Outcome of [`ShutdownCoordinator::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Another call already ran (or is running) the shutdown sequence.
    pub already_shutting_down: bool,
    /// Executions live when shutdown began.
    pub tracked: usize,
    /// Executions that exited within the join timeout.
    pub joined: usize,
    /// Executions interrupted while blocked in [`pause`].
    pub interrupted: usize,
    /// Threads whose execution did not exit in time and was abandoned.
    pub abandoned: Vec<ThreadId>,
    /// The calling thread was itself a tracked execution and was skipped.
    pub skipped_current: bool,
}

impl ShutdownReport {
    /// `true` if nothing had to be abandoned.
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }

    pub(crate) fn already() -> Self {
        Self {
            already_shutting_down: true,
            ..Self::default()
        }
    }
}

/// Tracks live worker executions of one pool and shuts them down gracefully.
pub struct ShutdownCoordinator {
    name: RwLock<String>,
    join_timeout: Duration,
    registry: Mutex<IndexMap<u64, Arc<Execution>>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Creates a coordinator; `join_timeout` bounds the wait for each execution.
    pub fn new(name: impl Into<String>, join_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: RwLock::new(name.into()),
            join_timeout,
            registry: Mutex::new(IndexMap::new()),
            next_id: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            token: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn join_timeout(&self) -> Duration {
        self.join_timeout
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of executions currently registered.
    pub fn live(&self) -> usize {
        self.registry.lock().len()
    }

    /// Registers the current thread's execution.
    ///
    /// The returned guard must live for the duration of the callback; dropping it
    /// removes the execution and wakes a pending join.
    pub fn enter(self: &Arc<Self>) -> Result<ExecutionGuard, PoolError> {
        let execution = Arc::new(Execution::new(
            thread::current(),
            self.token.child_token(),
        ));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut registry = self.registry.lock();
            if self.is_shutting_down() {
                return Err(PoolError::ShuttingDown { pool: self.name() });
            }
            registry.insert(id, Arc::clone(&execution));
        }

        let previous = CURRENT.with(|c| c.borrow_mut().replace(Arc::clone(&execution)));
        Ok(ExecutionGuard {
            coordinator: Arc::clone(self),
            id,
            execution,
            previous,
        })
    }

    /// Runs the shutdown sequence (see module docs).
    pub fn shutdown(&self) -> ShutdownReport {
        if self.is_shutting_down() {
            return ShutdownReport::already();
        }

        let snapshot: Vec<(u64, Arc<Execution>)> = {
            let registry = self.registry.lock();
            if self.shutting_down.swap(true, Ordering::SeqCst) {
                return ShutdownReport::already();
            }
            registry
                .iter()
                .map(|(id, exec)| (*id, Arc::clone(exec)))
                .collect()
        };

        let name = self.name();
        info!(coordinator = %name, tracked = snapshot.len(), "shutting down");
        self.token.cancel();

        let mut report = ShutdownReport {
            tracked: snapshot.len(),
            ..ShutdownReport::default()
        };
        let me = thread::current().id();

        for (id, exec) in snapshot {
            if exec.is_done() {
                report.joined += 1;
                continue;
            }

            let label = exec.thread_label();
            if exec.thread.id() == me {
                info!(coordinator = %name, thread = %label, "execution is on the current thread, skipping");
                report.skipped_current = true;
                continue;
            }

            if exec.blocked.load(Ordering::SeqCst) {
                info!(coordinator = %name, thread = %label, "interrupting");
                exec.thread.unpark();
                report.interrupted += 1;
            }

            debug!(coordinator = %name, thread = %label, "joining");
            if exec.join(self.join_timeout) {
                report.joined += 1;
                debug!(coordinator = %name, thread = %label, "done");
            } else {
                let err = PoolError::JoinTimeout {
                    pool: name.clone(),
                    timeout: self.join_timeout,
                    thread: label,
                };
                error!(label = err.as_label(), "{err}");
                self.registry.lock().shift_remove(&id);
                report.abandoned.push(exec.thread.id());
            }
        }

        info!(
            coordinator = %name,
            joined = report.joined,
            abandoned = report.abandoned.len(),
            "shutdown complete"
        );
        report
    }
}

/// Keeps an execution registered while alive.
pub struct ExecutionGuard {
    coordinator: Arc<ShutdownCoordinator>,
    id: u64,
    execution: Arc<Execution>,
    previous: Option<Arc<Execution>>,
}

impl ExecutionGuard {
    /// Cooperative cancellation token of this execution.
    pub fn token(&self) -> &CancellationToken {
        &self.execution.token
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.coordinator.registry.lock().shift_remove(&self.id);
        self.execution.finish();
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

/// `true` while the current thread executes a tracked pool callback.
pub fn is_worker_thread() -> bool {
    CURRENT.with(|c| c.borrow().is_some())
}

/// `true` once the pool running the current callback has begun shutting down.
///
/// Always `false` outside a tracked execution (e.g. inline on a caller thread).
pub fn is_cancelled() -> bool {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .is_some_and(|exec| exec.token.is_cancelled())
    })
}

/// Interruptible wait.
///
/// Inside a tracked execution the wait ends early with
/// [`StageError::Interrupted`] when the owning pool shuts down. Outside of one it is
/// a plain sleep.
pub fn pause(duration: Duration) -> Result<(), StageError> {
    let current = CURRENT.with(|c| c.borrow().clone());
    let Some(exec) = current else {
        thread::sleep(duration);
        return Ok(());
    };

    // `None`: the duration does not fit an `Instant`, wait until interrupted.
    let deadline = Instant::now().checked_add(duration);
    exec.blocked.store(true, Ordering::SeqCst);
    let res = loop {
        if exec.token.is_cancelled() {
            break Err(StageError::Interrupted);
        }
        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break Ok(());
                }
                thread::park_timeout(deadline - now);
            }
            None => thread::park(),
        }
    };
    exec.blocked.store(false, Ordering::SeqCst);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_guard_registers_and_removes() {
        let coord = ShutdownCoordinator::new("test", Duration::from_secs(1));
        assert!(!is_worker_thread());
        {
            let _guard = coord.enter().unwrap();
            assert_eq!(coord.live(), 1);
            assert!(is_worker_thread());
            assert!(!is_cancelled());
        }
        assert_eq!(coord.live(), 0);
        assert!(!is_worker_thread());
    }

    #[test]
    fn test_enter_refused_after_shutdown() {
        let coord = ShutdownCoordinator::new("test", Duration::from_secs(1));
        let report = coord.shutdown();
        assert!(report.is_clean());
        assert_eq!(report.tracked, 0);
        assert!(matches!(
            coord.enter(),
            Err(PoolError::ShuttingDown { .. })
        ));
    }

    #[test]
    fn test_shutdown_joins_cooperative_workers() {
        let coord = ShutdownCoordinator::new("test", Duration::from_secs(5));
        let (ready_tx, ready_rx) = mpsc::channel();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coord = Arc::clone(&coord);
                let ready = ready_tx.clone();
                thread::spawn(move || {
                    let _guard = coord.enter().unwrap();
                    ready.send(()).unwrap();
                    while !is_cancelled() {
                        thread::sleep(Duration::from_millis(5));
                    }
                    thread::sleep(Duration::from_millis(20));
                })
            })
            .collect();
        for _ in 0..4 {
            ready_rx.recv().unwrap();
        }

        let report = coord.shutdown();
        assert_eq!(report.tracked, 4);
        assert_eq!(report.joined, 4);
        assert!(report.is_clean());
        assert_eq!(coord.live(), 0);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_shutdown_interrupts_paused_worker() {
        let coord = ShutdownCoordinator::new("test", Duration::from_secs(5));
        let (ready_tx, ready_rx) = mpsc::channel();

        let c = Arc::clone(&coord);
        let worker = thread::spawn(move || {
            let _guard = c.enter().unwrap();
            ready_tx.send(()).unwrap();
            pause(Duration::from_secs(60))
        });
        ready_rx.recv().unwrap();
        // Let the worker reach the park.
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let report = coord.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.interrupted, 1);
        assert_eq!(report.joined, 1);
        assert_eq!(worker.join().unwrap(), Err(StageError::Interrupted));
    }

    #[test]
    fn test_stuck_worker_is_abandoned_and_shutdown_is_idempotent() {
        let coord = ShutdownCoordinator::new("test", Duration::from_millis(300));
        let release = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let c = Arc::clone(&coord);
        let r = Arc::clone(&release);
        let stuck = thread::spawn(move || {
            let _guard = c.enter().unwrap();
            ready_tx.send(()).unwrap();
            // Ignores cancellation on purpose.
            while !r.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        });
        ready_rx.recv().unwrap();

        let c = Arc::clone(&coord);
        let first = thread::spawn(move || c.shutdown());
        while !coord.is_shutting_down() {
            thread::sleep(Duration::from_millis(1));
        }

        let second = coord.shutdown();
        assert!(second.already_shutting_down);

        let report = first.join().unwrap();
        assert!(!report.already_shutting_down);
        assert_eq!(report.abandoned, vec![stuck.thread().id()]);
        assert_eq!(coord.live(), 0);

        release.store(true, Ordering::SeqCst);
        stuck.join().unwrap();
        assert_eq!(coord.live(), 0);
    }

    #[test]
    fn test_shutdown_skips_calling_thread() {
        let coord = ShutdownCoordinator::new("test", Duration::from_millis(100));
        let guard = coord.enter().unwrap();
        let report = coord.shutdown();
        assert!(report.skipped_current);
        assert!(report.is_clean());
        assert!(guard.token().is_cancelled());
        drop(guard);
        assert_eq!(coord.live(), 0);
    }

    #[test]
    fn test_unbounded_join_timeout_waits_for_exit() {
        let coord = ShutdownCoordinator::new("test", Duration::MAX);
        let (ready_tx, ready_rx) = mpsc::channel();

        let c = Arc::clone(&coord);
        let worker = thread::spawn(move || {
            let _guard = c.enter().unwrap();
            ready_tx.send(()).unwrap();
            // Finishes on its own, ignoring cancellation.
            thread::sleep(Duration::from_millis(200));
        });
        ready_rx.recv().unwrap();

        let report = coord.shutdown();
        assert!(!report.already_shutting_down);
        assert_eq!(report.tracked, 1);
        assert_eq!(report.joined, 1);
        assert!(report.is_clean());
        assert_eq!(coord.live(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_unbounded_pause_is_interrupted() {
        let coord = ShutdownCoordinator::new("test", Duration::from_secs(5));
        let (ready_tx, ready_rx) = mpsc::channel();

        let c = Arc::clone(&coord);
        let worker = thread::spawn(move || {
            let _guard = c.enter().unwrap();
            ready_tx.send(()).unwrap();
            pause(Duration::MAX)
        });
        ready_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));

        let report = coord.shutdown();
        assert_eq!(report.joined, 1);
        assert!(report.is_clean());
        assert_eq!(worker.join().unwrap(), Err(StageError::Interrupted));
    }

    #[test]
    fn test_pause_outside_execution_sleeps() {
        assert!(pause(Duration::from_millis(1)).is_ok());
    }
}
