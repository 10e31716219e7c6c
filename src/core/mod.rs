//! Runtime core: configuration and shutdown coordination.
//!
//! Internal modules:
//! - [`config`]: stage and pool configuration;
//! - [`shutdown`]: tracking, interrupting and joining pool worker executions.
//!
//! [`shutdown`] is public so callbacks can reach [`shutdown::pause`],
//! [`shutdown::is_cancelled`] and [`shutdown::is_worker_thread`].

mod config;
pub mod shutdown;

pub use config::{PoolConfig, StageConfig};
