//! # LogWriter: simple event logger
//!
//! A minimal listener that logs every event a stage fires through `tracing`.
//! Use it for tests or demos; register it on any stage.
//!
//! ## Example output
//! ```text
//! INFO stagevisor::listeners::log: [data] stage="ingest" event=Event#3 (data)
//! WARN stagevisor::listeners::log: [failure] stage="ingest" retry_count=0 err=execution failed: empty payload
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::StageError;
use crate::events::{Event, EventKind};
use crate::listeners::Listen;
use crate::stages::Stage;

/// Event writer listener.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<P: Send + Sync + 'static> Listen<P> for LogWriter {
    fn on_event(&self, source: &Stage<P>, e: &Arc<Event<P>>) -> Result<(), StageError> {
        match &e.kind {
            EventKind::Data(_) => {
                info!(stage = %source.name(), event = %e, "[data]");
            }
            EventKind::Failure(ctx) => {
                let err = ctx.error().map(ToString::to_string).unwrap_or_default();
                warn!(
                    stage = %source.name(),
                    retry_count = ctx.retry_count(),
                    err = %err,
                    "[failure]"
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "LogWriter"
    }
}
