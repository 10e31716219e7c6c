//! # stagevisor
//!
//! **Stagevisor** is a staged event-driven (SEDA) runtime for Rust.
//!
//! A pipeline is a graph of [`Stage`]s. Each stage owns a worker and a set of
//! listeners; an event pushed into a stage runs the worker either inline on the
//! pushing thread or on the stage's worker pool, and the stage fires events to its
//! listeners. A stage is itself a listener, so stages chain.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   caller threads                        ┌────────────────────────────┐
//!   push(event) ─────────────────────────►│ Stage "ingest"             │
//!                                         │  - worker (WorkerRef)      │
//!                                         │  - ListenerSet (ordered)   │
//!                                         │  - RetryPolicy             │
//!                                         │  - pool (PoolRef, option)  │
//!                                         └──────┬──────────────┬──────┘
//!                         inline (no pool,       │              │ pooled
//!                         caller context,        ▼              ▼
//!                         run_synchronous)   invoke()     StagePool::enqueue
//!                                                │              │
//!                                                │       ┌──────┴────────────────┐
//!                                                │       │ Dedicated/SharedPool  │
//!                                                │       │ ShutdownCoordinator   │
//!                                                │       │ trampoline: invoke()  │
//!                                                │       └──────┬────────────────┘
//!                                                │ Err/panic    │ Err/panic → exception channel
//!                                                ▼              ▼
//!                                   fire(Event::failure(ctx)) through the same stage
//!                                         ┌───────────┼───────────┐
//!                                         ▼           ▼           ▼
//!                                     listener1   Stage "sink"  LogWriter
//!                                                 (pushes)
//! ```
//!
//! ### Failure lifecycle
//! ```text
//! push ──► WorkerContext{retry_count: 0}
//!   ├─ Ok  ──► done
//!   └─ Err ──► error stored on the context
//!              └─► fire(EventKind::Failure(ctx)) on the owning stage
//!                   ├─ a listener calls stage.retry(&ctx)
//!                   │     ├─ allowed ──► WorkerContext{retry_count + 1}, routed like a push
//!                   │     └─ refused ──► Err(RetriesExhausted | original fatal error)
//!                   └─ nobody retries ──► logged, dropped
//! ```
//!
//! ## Features
//! | Area          | Description                                                      | Key types / traits                         |
//! |---------------|------------------------------------------------------------------|--------------------------------------------|
//! | **Stages**    | Dispatch engine: listeners, fire, push, failure self-firing.     | [`Stage`], [`StageBuilder`]                |
//! | **Workers**   | Per-stage business logic and its resubmittable execution.        | [`Worker`], [`WorkerFn`], [`WorkerContext`]|
//! | **Listeners** | Observe fired events; ordered, deduplicated by identity.         | [`Listen`], [`ListenerFn`], [`ListenerId`] |
//! | **Pools**     | Asynchronous execution backends.                                 | [`StagePool`], [`DedicatedPool`], [`SharedPool`] |
//! | **Shutdown**  | Track, interrupt, bounded-join and abandon pool executions.      | [`ShutdownCoordinator`], [`ShutdownReport`]|
//! | **Policies**  | Bounded retry with backoff.                                      | [`RetryPolicy`], [`BackoffPolicy`]         |
//! | **Errors**    | Typed errors for workers and pools.                              | [`StageError`], [`PoolError`]              |
//! | **Configuration** | Stage and pool settings.                                     | [`StageConfig`], [`PoolConfig`]            |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] listener _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use stagevisor::{
//!     DedicatedPool, Event, ListenerFn, PoolConfig, Stage, StageError, WorkerFn, WorkerRef,
//! };
//!
//! let worker: WorkerRef<String> = WorkerFn::arc("ingest", |stage: &Stage<String>, ev: &Event<String>| {
//!     match ev.payload() {
//!         Some(text) if text.is_empty() => Err(StageError::fail("empty payload")),
//!         Some(text) => stage.fire(Event::new(text.to_uppercase())),
//!         None => Ok(()),
//!     }
//! });
//!
//! let pool = DedicatedPool::<String>::new(&PoolConfig {
//!     min_threads: 1,
//!     max_threads: 4,
//!     ..PoolConfig::default()
//! });
//! let ingest = Stage::builder(worker).with_name("ingest").with_pool(pool).build();
//!
//! ingest.register(ListenerFn::arc("sink", |_: &Stage<String>, ev: &Arc<Event<String>>| {
//!     match ev.failure_context() {
//!         Some(ctx) => eprintln!("failed: {ctx}"),
//!         None => println!("{:?}", ev.payload()),
//!     }
//!     Ok::<_, StageError>(())
//! }));
//!
//! ingest.push(Event::new("hello".to_string()));
//! ingest.push(Event::new(String::new()).with_run_synchronous(true));
//!
//! let report = ingest.shutdown().expect("pool assigned");
//! assert!(report.is_clean());
//! ```
mod core;
mod error;
mod events;
mod listeners;
mod policies;
mod pools;
mod stages;

// ---- Public re-exports ----

pub use core::shutdown;
pub use core::shutdown::{ExecutionGuard, ShutdownCoordinator, ShutdownReport};
pub use core::{PoolConfig, StageConfig};
pub use error::{PoolError, StageError};
pub use events::{Event, EventKind};
pub use listeners::{Listen, ListenerFn, ListenerId, ListenerOrder, ListenerRef};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
pub use pools::{DedicatedPool, ExceptionHandler, PoolRef, SharedPool, StagePool};
pub use stages::{Stage, StageBuilder, Worker, WorkerContext, WorkerFn, WorkerRef};

// Optional: expose a simple built-in logger listener (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use listeners::LogWriter;
