//! # Events pushed into and fired from stages.
//!
//! An [`Event`] is an immutable unit of work or data. It is shared as
//! `Arc<Event<P>>` so that fan-out and stage chaining never copy the payload.
//!
//! The [`EventKind`] distinguishes user data from the captured-failure event a
//! stage fires about itself when its worker fails.
//!
//! ## Ordering
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. It identifies the event in logs; it is **not** a delivery order
//! across stages.
//!
//! ## Example
//! ```rust
//! use stagevisor::{Event, EventKind};
//!
//! let ev = Event::new("payload").with_run_synchronous(true);
//!
//! assert!(ev.run_synchronous);
//! assert_eq!(ev.payload(), Some(&"payload"));
//! assert!(matches!(ev.kind, EventKind::Data(_)));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::stages::WorkerContext;

/// Global sequence counter for event identity.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of stage events.
pub enum EventKind<P> {
    /// User payload.
    Data(P),

    /// A worker failed; carries the execution context with the captured error.
    ///
    /// Fired by the stage that owns the worker, through its own listeners.
    /// Listeners may resubmit it with [`Stage::retry`](crate::Stage::retry).
    Failure(Box<WorkerContext<P>>),
}

/// Immutable stage event.
///
/// - `seq`: monotonic global sequence (identity in logs)
/// - `at`: wall-clock timestamp
/// - `run_synchronous`: forces inline execution on the pushing thread
pub struct Event<P> {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// If `true`, the event runs in the caller context regardless of stage configuration.
    pub run_synchronous: bool,
    /// Event classification and payload.
    pub kind: EventKind<P>,
}

impl<P> Event<P> {
    fn with_kind(kind: EventKind<P>) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            run_synchronous: false,
            kind,
        }
    }

    /// Creates a data event with the next sequence number.
    pub fn new(payload: P) -> Self {
        Self::with_kind(EventKind::Data(payload))
    }

    /// Creates the failure event for a failed worker context.
    pub fn failure(ctx: WorkerContext<P>) -> Self {
        Self::with_kind(EventKind::Failure(Box::new(ctx)))
    }

    /// Sets the run-synchronously flag.
    #[inline]
    pub fn with_run_synchronous(mut self, run_synchronous: bool) -> Self {
        self.run_synchronous = run_synchronous;
        self
    }

    /// Returns the user payload for data events.
    #[inline]
    pub fn payload(&self) -> Option<&P> {
        match &self.kind {
            EventKind::Data(p) => Some(p),
            EventKind::Failure(_) => None,
        }
    }

    /// Returns the failed context for failure events.
    #[inline]
    pub fn failure_context(&self) -> Option<&WorkerContext<P>> {
        match &self.kind {
            EventKind::Data(_) => None,
            EventKind::Failure(ctx) => Some(ctx),
        }
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self.kind, EventKind::Failure(_))
    }

    /// Short kind label for logs.
    pub fn as_label(&self) -> &'static str {
        match self.kind {
            EventKind::Data(_) => "data",
            EventKind::Failure(_) => "failure",
        }
    }
}

impl<P> fmt::Display for Event<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event#{} ({})", self.seq, self.as_label())?;
        if self.run_synchronous {
            f.write_str(" sync")?;
        }
        Ok(())
    }
}

impl<P> fmt::Debug for Event<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("seq", &self.seq)
            .field("kind", &self.as_label())
            .field("run_synchronous", &self.run_synchronous)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(1u8);
        let b = Event::new(2u8);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_data_event_defaults() {
        let ev = Event::new("x");
        assert!(!ev.run_synchronous);
        assert!(!ev.is_failure());
        assert!(ev.failure_context().is_none());
        assert_eq!(ev.to_string(), format!("Event#{} (data)", ev.seq));
    }
}
