//! # Stage worker abstraction and function-backed implementation.
//!
//! This module defines the [`Worker`] trait (the per-stage business logic) and a
//! convenient closure-backed implementation [`WorkerFn`]. The common handle type is
//! [`WorkerRef`], an `Arc<dyn Worker<P>>` that a [`WorkerContext`](crate::WorkerContext)
//! captures so the same logic can be resubmitted on retry.
//!
//! A worker receives the stage it belongs to, so it can forward results through the
//! stage's listeners with [`Stage::fire`]. Workers run either on the pushing thread or
//! on a pool thread. Long waits inside a worker should use
//! [`shutdown::pause`](crate::shutdown::pause) so pool shutdown can interrupt them.

use std::borrow::Cow;
use std::sync::Arc;

use crate::error::StageError;
use crate::events::Event;
use crate::stages::Stage;

/// Shared handle to a worker.
pub type WorkerRef<P> = Arc<dyn Worker<P>>;

/// # Synchronous stage worker.
///
/// # Example
/// ```
/// use stagevisor::{Event, Stage, StageError, Worker};
///
/// struct Upper;
///
/// impl Worker<String> for Upper {
///     fn name(&self) -> &str { "upper" }
///
///     fn work(&self, stage: &Stage<String>, event: &Event<String>) -> Result<(), StageError> {
///         let text = event.payload().ok_or_else(|| StageError::fatal("no payload"))?;
///         stage.fire(Event::new(text.to_uppercase()))
///     }
/// }
/// ```
pub trait Worker<P>: Send + Sync + 'static {
    /// Returns a stable, human-readable worker name.
    fn name(&self) -> &str;

    /// Handles one event pushed into `stage`.
    fn work(&self, stage: &Stage<P>, event: &Event<P>) -> Result<(), StageError>;
}

/// Function-backed worker.
///
/// ## Example
/// ```rust
/// use stagevisor::{Event, Stage, StageError, WorkerFn, WorkerRef};
///
/// let w: WorkerRef<u32> = WorkerFn::arc("double", |stage: &Stage<u32>, ev: &Event<u32>| {
///     match ev.payload() {
///         Some(n) => stage.fire(Event::new(n * 2)),
///         None => Ok::<_, StageError>(()),
///     }
/// });
/// assert_eq!(w.name(), "double");
/// ```
#[derive(Debug)]
pub struct WorkerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> WorkerFn<F> {
    /// Creates a new function-backed worker.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the worker and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<P, F> Worker<P> for WorkerFn<F>
where
    F: Fn(&Stage<P>, &Event<P>) -> Result<(), StageError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn work(&self, stage: &Stage<P>, event: &Event<P>) -> Result<(), StageError> {
        (self.f)(stage, event)
    }
}
