//! Asynchronous job execution engine.
//!
//! - [`JobRegistry`] maps names to [`JobHandler`]s
//! - [`Scheduler`] validates arguments, launches handlers and tracks each
//!   execution through a [`Job`] handle
//! - [`create_job_handler`] lifts plain functions into handlers
//! - [`Dispatcher`] routes one job name to whichever registered job accepts
//!   the argument
//! - [`strategy`] wraps handlers to serialize, limit or memoize executions

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod job;
pub mod lift;
pub mod logging;
pub mod registry;
pub mod scheduler;
pub mod strategy;
pub mod types;


pub use context::JobContext;
pub use dispatcher::{create_dispatcher, DefaultJob, Dispatcher};
pub use error::{JobError, JobResult};
pub use handler::{HandlerKind, JobHandler};
pub use job::{Job, JobEvents};
pub use lift::{create_job_handler, FnJobHandler, JobBehavior};
pub use logging::{LogEntry, LogLevel, LogSink, TracingLogSink};
pub use registry::{JobNames, JobRegistry};
pub use scheduler::{PauseGuard, ScheduleOptions, Scheduler, SchedulerBuilder};
pub use types::{JobDescription, JobEvent, JobName, JobOutcome, JobState};
