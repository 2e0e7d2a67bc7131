use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::handler::JobHandler;
use crate::jobs::job::{Job, JobCore, JobEvents};
use crate::jobs::logging::{LogEntry, LogLevel, LogSink};
use crate::jobs::registry::JobRegistry;
use crate::jobs::scheduler::{ScheduleOptions, Scheduler};
use crate::jobs::types::{JobDescription, JobEvent};
use crate::schema::SchemaValidator;

/// Job execution context passed to handler bodies
#[derive(Clone)]
pub struct JobContext {
    core: Arc<JobCore>,
    handler: Arc<dyn JobHandler>,
    scheduler: Scheduler,
    validator: Arc<dyn SchemaValidator>,
    log_sink: Arc<dyn LogSink>,
    input: Arc<Mutex<mpsc::Receiver<JsonValue>>>,
}

impl JobContext {
    pub(crate) fn new(
        core: Arc<JobCore>,
        handler: Arc<dyn JobHandler>,
        scheduler: Scheduler,
        validator: Arc<dyn SchemaValidator>,
        log_sink: Arc<dyn LogSink>,
        input: mpsc::Receiver<JsonValue>,
    ) -> Self {
        Self {
            core,
            handler,
            scheduler,
            validator,
            log_sink,
            input: Arc::new(Mutex::new(input)),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.core.id()
    }

    pub fn job_name(&self) -> &str {
        self.core.name()
    }

    pub fn description(&self) -> &JobDescription {
        self.handler.description()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &JobRegistry {
        self.scheduler.registry()
    }

    /// The validator this job was scheduled with.
    pub fn validator(&self) -> &Arc<dyn SchemaValidator> {
        &self.validator
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.core.cancellation()
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.cancellation().is_cancelled()
    }

    /// Resolves once the job has been asked to stop.
    pub async fn cancelled(&self) {
        self.core.cancellation().cancelled().await
    }

    // ========================================================================
    // Output and channels
    // ========================================================================

    /// Emit an intermediate output value. Returns `false` if the job has
    /// already finished.
    pub fn emit_output(&self, value: JsonValue) -> bool {
        self.core.emit(JobEvent::Output(value))
    }

    /// Publish a message on one of the channels declared in the job
    /// description, after validating it against the channel schema.
    pub async fn emit_channel(&self, name: &str, message: JsonValue) -> JobResult<()> {
        let schema = self
            .description()
            .channels
            .get(name)
            .ok_or_else(|| JobError::UnknownChannel {
                job: self.job_name().to_string(),
                channel: name.to_string(),
            })?;

        let outcome = self.validator.validate(schema, message).await;
        if !outcome.success {
            return Err(JobError::ChannelValidation {
                job: self.job_name().to_string(),
                channel: name.to_string(),
                errors: outcome.errors,
            });
        }

        self.core.emit(JobEvent::Channel {
            name: name.to_string(),
            message: outcome.value,
        });
        Ok(())
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Ask the caller for input and wait for the next value.
    ///
    /// Fails with [`JobError::Aborted`] if the job is stopped while waiting.
    pub async fn request_input(&self, request: JsonValue) -> JobResult<JsonValue> {
        if self.core.emit_input_request(request).is_none() {
            return Err(JobError::InputClosed {
                job: self.job_name().to_string(),
            });
        }
        self.next_input().await
    }

    /// Wait for the next input value without emitting a request.
    pub async fn next_input(&self) -> JobResult<JsonValue> {
        let cancellation = self.core.cancellation();

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(JobError::Aborted {
                job: self.job_name().to_string(),
            }),
            value = async { self.input.lock().await.recv().await } => {
                value.ok_or_else(|| JobError::InputClosed {
                    job: self.job_name().to_string(),
                })
            }
        }
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            level,
            message: message.into(),
            job: self.job_name().to_string(),
            job_id: self.job_id(),
            timestamp: jiff::Timestamp::now(),
        };

        self.log_sink.log(&entry);
        self.core.emit(JobEvent::Log(entry));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Re-publish an event of a nested job on this job.
    ///
    /// Lifecycle events are left to the scheduler; input requests get a
    /// fresh id in this job's sequence.
    pub(crate) fn forward(&self, event: JobEvent) {
        match event {
            JobEvent::Output(_) | JobEvent::Channel { .. } => {
                self.core.emit(event);
            }
            JobEvent::Log(entry) => {
                self.log_sink.log(&entry);
                self.core.emit(JobEvent::Log(entry));
            }
            JobEvent::InputRequest { request, .. } => {
                self.core.emit_input_request(request);
            }
            JobEvent::Started | JobEvent::Success(_) | JobEvent::Failure(_) | JobEvent::Aborted => {}
        }
    }

    // ========================================================================
    // Nested scheduling
    // ========================================================================

    /// Schedule a registered job as a child of this one.
    ///
    /// The child shares this job's validator and log sink, and is stopped
    /// when this job is stopped.
    pub fn schedule_job(&self, name: &str, argument: JsonValue) -> Job {
        self.schedule_job_with(name, argument, ScheduleOptions::default())
    }

    pub fn schedule_job_with(&self, name: &str, argument: JsonValue, options: ScheduleOptions) -> Job {
        self.scheduler
            .schedule_with(name, argument, self.child_options(options))
    }

    /// Like [`schedule_job`](Self::schedule_job), subscribing before the
    /// child can emit anything.
    pub fn schedule_job_subscribed(&self, name: &str, argument: JsonValue) -> (Job, JobEvents) {
        self.scheduler
            .schedule_subscribed(name, argument, self.child_options(ScheduleOptions::default()))
    }

    /// Run an unregistered handler as a child of this job.
    pub fn schedule_handler(&self, handler: Arc<dyn JobHandler>, argument: JsonValue) -> Job {
        self.scheduler
            .schedule_handler(handler, argument, self.child_options(ScheduleOptions::default()))
    }

    pub fn schedule_handler_subscribed(
        &self,
        handler: Arc<dyn JobHandler>,
        argument: JsonValue,
    ) -> (Job, JobEvents) {
        self.scheduler.schedule_handler_subscribed(
            handler,
            argument,
            self.child_options(ScheduleOptions::default()),
        )
    }

    fn child_options(&self, mut options: ScheduleOptions) -> ScheduleOptions {
        options.cancellation = Some(self.core.cancellation().clone());
        options.validator.get_or_insert_with(|| Arc::clone(&self.validator));
        options.log_sink.get_or_insert_with(|| Arc::clone(&self.log_sink));
        options
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id())
            .field("job_name", &self.job_name())
            .finish()
    }
}
