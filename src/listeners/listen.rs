//! # Core listener trait
//!
//! `Listen` is the extension point for observing what a [`Stage`] fires. A stage
//! invokes its listeners in a direct loop on the firing thread, passing itself as
//! the source.
//!
//! ## Contract
//! - Identity is the address of the shared listener: registering the same `Arc`
//!   twice is a no-op; two distinct instances are two listeners.
//! - An `Err` returned from [`Listen::on_event`] stops the fan-out and propagates to
//!   the caller of [`Stage::fire`].
//! - A [`Stage`] is itself a listener: its `on_event` pushes the event.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use stagevisor::{Event, Listen, Stage, StageError};
//!
//! struct Audit;
//!
//! impl Listen<String> for Audit {
//!     fn on_event(&self, source: &Stage<String>, ev: &Arc<Event<String>>) -> Result<(), StageError> {
//!         println!("{} fired {}", source.name(), ev);
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &str { "audit" }
//! }
//! ```

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::StageError;
use crate::events::Event;
use crate::stages::Stage;

/// Shared handle to a listener.
pub type ListenerRef<P> = Arc<dyn Listen<P>>;

/// Comparator placing an order on listener invocation.
pub type ListenerOrder = Arc<dyn Fn(&ListenerId, &ListenerId) -> Ordering + Send + Sync>;

/// Contract for stage listeners.
pub trait Listen<P>: Send + Sync + 'static {
    /// Handles one fired event.
    fn on_event(&self, source: &Stage<P>, event: &Arc<Event<P>>) -> Result<(), StageError>;

    /// Human-readable name (for logs and ordering).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returns the listener as a stage, if it is one.
    fn into_stage(self: Arc<Self>) -> Option<Arc<Stage<P>>> {
        None
    }
}

/// Stable identity of a registered listener.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId {
    name: String,
    addr: usize,
}

impl ListenerId {
    /// Identity of a listener handle.
    pub fn of<P: 'static>(listener: &ListenerRef<P>) -> Self {
        Self {
            name: listener.name().to_string(),
            addr: addr_of(listener),
        }
    }

    /// The listener's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The listener's address (identity).
    pub fn addr(&self) -> usize {
        self.addr
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.name, self.addr)
    }
}

/// Data address of a shared value, ignoring trait-object metadata.
pub(crate) fn addr_of<T: ?Sized>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

/// Function-backed listener.
///
/// ## Example
/// ```rust
/// use std::sync::Arc;
/// use stagevisor::{Event, ListenerFn, ListenerRef, Stage, StageError};
///
/// let l: ListenerRef<u32> = ListenerFn::arc("print", |src: &Stage<u32>, ev: &Arc<Event<u32>>| {
///     println!("{} -> {}", src.name(), ev);
///     Ok::<_, StageError>(())
/// });
/// assert_eq!(l.name(), "print");
/// ```
pub struct ListenerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ListenerFn<F> {
    /// Creates a new function-backed listener.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the listener and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<P, F> Listen<P> for ListenerFn<F>
where
    F: Fn(&Stage<P>, &Arc<Event<P>>) -> Result<(), StageError> + Send + Sync + 'static,
{
    fn on_event(&self, source: &Stage<P>, event: &Arc<Event<P>>) -> Result<(), StageError> {
        (self.f)(source, event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
