//! Stage events.
//!
//! ## Contents
//! - [`Event`], [`EventKind`] immutable event value and its classification
//!
//! Events are created by callers (data) or by stages themselves (failure) and are
//! passed around as `Arc<Event<P>>`.

mod event;

pub use event::{Event, EventKind};
