//! # Worker pools.
//!
//! A stage hands asynchronous work to a [`StagePool`]. Two interchangeable backends
//! are provided:
//!
//! | Backend           | Threads                                  | Name / sizing        |
//! |-------------------|------------------------------------------|----------------------|
//! | [`SharedPool`]    | blocking pool of a shared tokio runtime  | fixed name, hints    |
//! | [`DedicatedPool`] | pool-owned OS threads                    | renamable, enforced  |
//!
//! Both run each context through the same trampoline: the execution is tracked by
//! the pool's [`ShutdownCoordinator`](crate::ShutdownCoordinator), a worker error or
//! panic is captured into the context, logged, and handed to the pool's exception
//! handlers (which is how the owning stage learns about it).

mod channel;
mod dedicated;
mod pool;
mod shared;

pub use dedicated::DedicatedPool;
pub use pool::{ExceptionHandler, PoolRef, StagePool};
pub use shared::SharedPool;
