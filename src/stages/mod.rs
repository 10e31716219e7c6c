//! # Stages and their workers.
//!
//! - [`Stage`]: the dispatch engine (listeners, fire, push, failure reporting, retry);
//! - [`StageBuilder`]: fluent construction;
//! - [`Worker`] / [`WorkerFn`]: the per-stage logic;
//! - [`WorkerContext`]: one execution of a worker on an event, resubmittable.

mod builder;
mod context;
mod stage;
mod worker;

pub use builder::StageBuilder;
pub use context::WorkerContext;
pub use stage::Stage;
pub use worker::{Worker, WorkerFn, WorkerRef};
