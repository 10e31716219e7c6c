//! # Stage listeners.
//!
//! This module provides the [`Listen`] trait, listener identity ([`ListenerId`]),
//! a closure-backed implementation ([`ListenerFn`]) and the collection a stage keeps
//! its listeners in.
//!
//! ## Architecture
//! ```text
//! Stage::fire(event)
//!     │  snapshot (registration order, or sorted by ListenerOrder)
//!     ├──► listener1.on_event(stage, event)
//!     ├──► listener2.on_event(stage, event)      ← a Stage here pushes the event
//!     └──► listenerN.on_event(stage, event)
//! ```
//!
//! ## Listener types
//! - **Stages**: chaining, each stage schedules the event independently
//! - **Observers**: logging, metrics, error handling, retry logic

mod listen;
#[cfg(feature = "logging")]
mod log;
mod set;

pub use listen::{Listen, ListenerFn, ListenerId, ListenerOrder, ListenerRef};
#[cfg(feature = "logging")]
pub use log::LogWriter;

pub(crate) use listen::addr_of;
pub(crate) use set::ListenerSet;
