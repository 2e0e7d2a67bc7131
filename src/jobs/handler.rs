use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::jobs::context::JobContext;
use crate::jobs::types::JobDescription;

/// Which family of handler a registry entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// A plain callable lifted by [`create_job_handler`](crate::jobs::create_job_handler)
    Function,
    /// A [`Dispatcher`](crate::jobs::Dispatcher) routing to other handlers
    Dispatcher,
    /// Any other implementation
    Custom,
}

/// A named, schema-described unit of executable work.
///
/// The scheduler validates the argument against
/// [`JobDescription::argument_schema`] before calling [`invoke`](Self::invoke),
/// so bodies only ever see validated arguments.
///
/// Cancellation is cooperative: a body must watch
/// [`JobContext::cancelled`] or poll [`JobContext::is_cancelled`] and return
/// promptly once it fires. A body that never checks keeps its job running
/// after `stop()`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn description(&self) -> &JobDescription;

    fn kind(&self) -> HandlerKind {
        HandlerKind::Custom
    }

    /// Run the job body, returning its final value.
    async fn invoke(&self, argument: JsonValue, ctx: JobContext) -> anyhow::Result<JsonValue>;
}
