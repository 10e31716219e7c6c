//! # Worker execution context (continuation).
//!
//! [`WorkerContext`] pairs a [`Worker`](crate::Worker) with the event it should run
//! on and the stage it runs for, plus the failure slot and retry counter. Holding the
//! context is enough to run the work again, which is what
//! [`Stage::retry`](crate::Stage::retry) does.
//!
//! The context refers to its stage weakly: work still queued on a pool when the stage
//! is dropped fails with a fatal error instead of keeping the stage alive.
//!
//! ## Lifecycle
//! ```text
//! Stage::push ──► WorkerContext (retry_count = 0)
//!                  ├─► inline:  invoke() on the pushing thread
//!                  └─► pooled:  StagePool::enqueue ──► invoke() on a pool thread
//! invoke() ── Err/panic ──► error set ──► Event::failure(ctx) fired by the stage
//! Stage::retry(&ctx) ──► fresh context (retry_count + 1, error cleared) ──► routed again
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::core::shutdown;
use crate::error::StageError;
use crate::events::Event;
use crate::stages::Stage;
use crate::stages::worker::WorkerRef;

/// Execution context of a stage worker.
pub struct WorkerContext<P> {
    stage: Weak<Stage<P>>,
    worker: WorkerRef<P>,
    event: Arc<Event<P>>,
    error: Option<StageError>,
    retry_count: u32,
    /// Backoff to wait before the worker runs (set on retries only).
    delay: Option<Duration>,
}

impl<P: 'static> WorkerContext<P> {
    /// Creates a fresh context (`retry_count = 0`, no error) for the stage's worker.
    pub fn new(stage: &Arc<Stage<P>>, event: Arc<Event<P>>) -> Self {
        Self::from_parts(Arc::downgrade(stage), Arc::clone(stage.worker()), event)
    }

    pub(crate) fn from_parts(stage: Weak<Stage<P>>, worker: WorkerRef<P>, event: Arc<Event<P>>) -> Self {
        Self {
            stage,
            worker,
            event,
            error: None,
            retry_count: 0,
            delay: None,
        }
    }

    /// The stage this work runs for, if it is still alive.
    pub fn stage(&self) -> Option<Arc<Stage<P>>> {
        self.stage.upgrade()
    }

    /// The worker to invoke.
    pub fn worker(&self) -> &WorkerRef<P> {
        &self.worker
    }

    /// The event the worker runs on.
    pub fn event(&self) -> &Arc<Event<P>> {
        &self.event
    }

    /// The captured failure, if the worker failed.
    pub fn error(&self) -> Option<&StageError> {
        self.error.as_ref()
    }

    /// Number of times this work has been resubmitted after a failure.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Builds the resubmission of this context: same worker and event,
    /// incremented retry counter, cleared error.
    pub(crate) fn next_attempt(&self, delay: Duration) -> Self {
        Self {
            stage: Weak::clone(&self.stage),
            worker: Arc::clone(&self.worker),
            event: Arc::clone(&self.event),
            error: None,
            retry_count: self.retry_count.saturating_add(1),
            delay: (delay > Duration::ZERO).then_some(delay),
        }
    }

    pub(crate) fn set_error(&mut self, error: StageError) {
        self.error = Some(error);
    }

    /// Runs the worker once, capturing an error or panic into the context.
    ///
    /// Fails with [`StageError::Fatal`] if the stage no longer exists.
    ///
    /// A pending retry delay is waited first with [`shutdown::pause`], so a pool
    /// shutdown interrupts it. The wait is inside the panic boundary as well.
    pub(crate) fn invoke(&mut self) -> Result<(), StageError> {
        let delay = self.delay.take();
        let stage = &self.stage;
        let worker = &self.worker;
        let event = &self.event;

        let attempt = catch_unwind(AssertUnwindSafe(|| {
            if let Some(delay) = delay {
                shutdown::pause(delay)?;
            }
            match stage.upgrade() {
                Some(stage) => worker.work(&stage, event),
                None => Err(StageError::fatal("stage dropped")),
            }
        }));
        let res = match attempt {
            Ok(res) => res,
            Err(panic_err) => Err(StageError::from_panic(&*panic_err)),
        };

        if let Err(e) = &res {
            self.error = Some(e.clone());
        }
        res
    }
}

impl<P> Clone for WorkerContext<P> {
    fn clone(&self) -> Self {
        Self {
            stage: Weak::clone(&self.stage),
            worker: Arc::clone(&self.worker),
            event: Arc::clone(&self.event),
            error: self.error.clone(),
            retry_count: self.retry_count,
            delay: self.delay,
        }
    }
}

impl<P: 'static> fmt::Display for WorkerContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WorkerContext {{worker = {}, event = {}",
            self.worker.name(),
            self.event
        )?;
        if let Some(err) = &self.error {
            write!(f, ", error = {}, retry_count = {}", err, self.retry_count)?;
        }
        f.write_str("}")
    }
}

impl<P: 'static> fmt::Debug for WorkerContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker", &self.worker.name())
            .field("event", &self.event)
            .field("error", &self.error)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::WorkerFn;

    fn stage() -> Arc<Stage<&'static str>> {
        let worker: WorkerRef<&'static str> = WorkerFn::arc(
            "check",
            |_: &Stage<&'static str>, ev: &Event<&'static str>| match ev.payload() {
                Some(p) if p.is_empty() => Err(StageError::fail("empty payload")),
                Some(p) if *p == "panic" => panic!("worker exploded"),
                _ => Ok(()),
            },
        );
        Stage::new(worker)
    }

    fn ctx_for(stage: &Arc<Stage<&'static str>>, payload: &'static str) -> WorkerContext<&'static str> {
        WorkerContext::new(stage, Arc::new(Event::new(payload)))
    }

    #[test]
    fn test_invoke_success_leaves_error_empty() {
        let stage = stage();
        let mut ctx = ctx_for(&stage, "ok");
        assert!(ctx.invoke().is_ok());
        assert!(ctx.error().is_none());
        assert_eq!(ctx.retry_count(), 0);
    }

    #[test]
    fn test_invoke_captures_error() {
        let stage = stage();
        let mut ctx = ctx_for(&stage, "");
        let err = ctx.invoke().unwrap_err();
        assert_eq!(err, StageError::fail("empty payload"));
        assert_eq!(ctx.error(), Some(&StageError::fail("empty payload")));
    }

    #[test]
    fn test_invoke_captures_panic() {
        let stage = stage();
        let mut ctx = ctx_for(&stage, "panic");
        assert_eq!(
            ctx.invoke().unwrap_err(),
            StageError::Panicked {
                info: "worker exploded".into()
            }
        );
    }

    #[test]
    fn test_next_attempt_increments_and_clears() {
        let stage = stage();
        let mut ctx = ctx_for(&stage, "");
        let _ = ctx.invoke();
        let next = ctx.next_attempt(Duration::ZERO);
        assert_eq!(next.retry_count(), 1);
        assert!(next.error().is_none());
        assert!(Arc::ptr_eq(next.event(), ctx.event()));
        assert!(next.delay.is_none());
    }

    #[test]
    fn test_display_includes_error_only_when_failed() {
        let stage = stage();
        let mut ctx = ctx_for(&stage, "");
        let before = ctx.to_string();
        assert!(before.starts_with("WorkerContext {worker = check, event = Event#"));
        assert!(!before.contains("error"));

        let _ = ctx.invoke();
        let after = ctx.to_string();
        assert!(after.ends_with(", error = execution failed: empty payload, retry_count = 0}"));
    }

    #[test]
    fn test_unbounded_retry_delay_is_interrupted_by_shutdown() {
        let stage = stage();
        let mut first = ctx_for(&stage, "");
        let _ = first.invoke();
        let mut retry = first.next_attempt(Duration::MAX);

        let coord = shutdown::ShutdownCoordinator::new("test", Duration::from_secs(5));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let c = Arc::clone(&coord);
        let runner = std::thread::spawn(move || {
            let _guard = c.enter().unwrap();
            ready_tx.send(()).unwrap();
            let res = retry.invoke();
            (res, retry)
        });
        ready_rx.recv().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert!(coord.shutdown().is_clean());
        let (res, retry) = runner.join().unwrap();
        assert_eq!(res, Err(StageError::Interrupted));
        assert_eq!(retry.error(), Some(&StageError::Interrupted));
        assert_eq!(retry.retry_count(), 1);
    }

    #[test]
    fn test_invoke_after_stage_dropped_is_fatal() {
        let stage = stage();
        let mut ctx = ctx_for(&stage, "ok");
        drop(stage);
        assert!(ctx.stage().is_none());
        assert_eq!(ctx.invoke(), Err(StageError::fatal("stage dropped")));
    }
}
