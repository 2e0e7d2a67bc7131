use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::SchedulerSettings;
use crate::jobs::context::JobContext;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::handler::{HandlerKind, JobHandler};
use crate::jobs::job::{CoreBuffers, Job, JobCore, JobEvents};
use crate::jobs::logging::{LogSink, TracingLogSink};
use crate::jobs::registry::JobRegistry;
use crate::jobs::types::{JobEvent, JobOutcome};
use crate::schema::{BasicSchemaValidator, JsonSchema, SchemaValidator};

/// Per-call scheduling options
#[derive(Clone, Default)]
pub struct ScheduleOptions {
    /// Overrides the scheduler's log sink for this job
    pub log_sink: Option<Arc<dyn LogSink>>,
    /// Parent token; the job is cancelled whenever it is
    pub cancellation: Option<CancellationToken>,
    /// Overrides the scheduler's validator for this job
    pub validator: Option<Arc<dyn SchemaValidator>>,
    /// Jobs that must succeed before this one is validated
    pub dependencies: Vec<Job>,
    /// Overrides [`SchedulerSettings::validate_output`]
    pub validate_output: Option<bool>,
}

impl ScheduleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_dependencies(mut self, jobs: impl IntoIterator<Item = Job>) -> Self {
        self.dependencies.extend(jobs);
        self
    }

    pub fn depends_on(mut self, job: &Job) -> Self {
        self.dependencies.push(job.clone());
        self
    }

    pub fn with_output_validation(mut self, enabled: bool) -> Self {
        self.validate_output = Some(enabled);
        self
    }
}

/// Validates, launches and tracks jobs from a [`JobRegistry`].
///
/// Cheap to clone. Scheduling spawns onto the current tokio runtime, so it
/// must be called from within one.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    registry: Arc<JobRegistry>,
    validator: Arc<dyn SchemaValidator>,
    log_sink: Arc<dyn LogSink>,
    settings: SchedulerSettings,
    paused: watch::Sender<usize>,
}

pub struct SchedulerBuilder {
    registry: Arc<JobRegistry>,
    validator: Option<Arc<dyn SchemaValidator>>,
    log_sink: Option<Arc<dyn LogSink>>,
    settings: SchedulerSettings,
}

impl SchedulerBuilder {
    pub fn validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Scheduler {
        let validator = self.validator.unwrap_or_else(|| {
            Arc::new(BasicSchemaValidator::new().with_defaults(self.settings.use_defaults))
        });

        Scheduler {
            inner: Arc::new(SchedulerInner {
                registry: self.registry,
                validator,
                log_sink: self.log_sink.unwrap_or_else(|| Arc::new(TracingLogSink)),
                settings: self.settings,
                paused: watch::Sender::new(0),
            }),
        }
    }
}

impl Scheduler {
    pub fn new(registry: impl Into<Arc<JobRegistry>>) -> Self {
        Self::builder(registry).build()
    }

    pub fn builder(registry: impl Into<Arc<JobRegistry>>) -> SchedulerBuilder {
        SchedulerBuilder {
            registry: registry.into(),
            validator: None,
            log_sink: None,
            settings: SchedulerSettings::default(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    pub fn validator(&self) -> &Arc<dyn SchemaValidator> {
        &self.inner.validator
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    /// Schedule a registered job by name.
    ///
    /// Always returns a handle: an unknown name or an invalid argument shows
    /// up as the job's terminal `Failure`, never as an error here.
    pub fn schedule(&self, name: &str, argument: JsonValue) -> Job {
        self.schedule_with(name, argument, ScheduleOptions::default())
    }

    pub fn schedule_with(&self, name: &str, argument: JsonValue, options: ScheduleOptions) -> Job {
        self.schedule_subscribed(name, argument, options).0
    }

    /// Schedule a job and subscribe to its events before it can emit any.
    pub fn schedule_subscribed(
        &self,
        name: &str,
        argument: JsonValue,
        options: ScheduleOptions,
    ) -> (Job, JobEvents) {
        match self.inner.registry.get(name) {
            Some(handler) => self.launch(handler, argument, options),
            None => self.reject_unknown(name, argument, options),
        }
    }

    /// Run a handler that is not in the registry, with the same lifecycle
    /// as a registered one.
    pub fn schedule_handler(
        &self,
        handler: Arc<dyn JobHandler>,
        argument: JsonValue,
        options: ScheduleOptions,
    ) -> Job {
        self.launch(handler, argument, options).0
    }

    pub fn schedule_handler_subscribed(
        &self,
        handler: Arc<dyn JobHandler>,
        argument: JsonValue,
        options: ScheduleOptions,
    ) -> (Job, JobEvents) {
        self.launch(handler, argument, options)
    }

    /// Hold newly scheduled jobs in `Queued` until every returned guard is
    /// dropped.
    pub fn pause(&self) -> PauseGuard {
        self.inner.paused.send_modify(|count| *count += 1);
        debug!("Scheduler paused");
        PauseGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow() > 0
    }

    fn buffers(&self) -> CoreBuffers {
        CoreBuffers {
            events: self.inner.settings.event_buffer,
            input: self.inner.settings.input_buffer,
        }
    }

    fn reject_unknown(
        &self,
        name: &str,
        argument: JsonValue,
        options: ScheduleOptions,
    ) -> (Job, JobEvents) {
        let validator = options
            .validator
            .unwrap_or_else(|| Arc::clone(&self.inner.validator));
        let (core, _input) = JobCore::new(
            name,
            argument,
            JsonSchema::any(),
            validator,
            CancellationToken::new(),
            self.buffers(),
        );
        let events = core.subscribe();

        warn!(job = %name, job_id = %core.id(), "Scheduled unknown job");
        core.emit(JobEvent::Failure(Arc::new(JobError::JobNameNotFound {
            name: name.to_string(),
        })));

        (Job::new(core), events)
    }

    fn launch(
        &self,
        handler: Arc<dyn JobHandler>,
        argument: JsonValue,
        options: ScheduleOptions,
    ) -> (Job, JobEvents) {
        let ScheduleOptions {
            log_sink,
            cancellation,
            validator,
            dependencies,
            validate_output,
        } = options;

        let validator = validator.unwrap_or_else(|| Arc::clone(&self.inner.validator));
        let log_sink = log_sink.unwrap_or_else(|| Arc::clone(&self.inner.log_sink));
        let cancellation = cancellation
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        let description = handler.description();
        let (core, input) = JobCore::new(
            &description.name,
            argument,
            description.input_schema.clone(),
            Arc::clone(&validator),
            cancellation,
            self.buffers(),
        );
        let events = core.subscribe();

        let ctx = JobContext::new(
            Arc::clone(&core),
            Arc::clone(&handler),
            self.clone(),
            Arc::clone(&validator),
            log_sink,
            input,
        );

        let run = JobRun {
            core: Arc::clone(&core),
            handler,
            ctx,
            validator,
            dependencies,
            validate_output: validate_output.unwrap_or(self.inner.settings.validate_output),
            paused: self.inner.paused.subscribe(),
        };

        let span = info_span!("job", job = %core.name(), job_id = %core.id());
        tokio::spawn(run.execute().instrument(span));

        (Job::new(core), events)
    }
}

/// Keeps the scheduler paused while alive
#[must_use = "the scheduler resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    inner: Arc<SchedulerInner>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.inner
            .paused
            .send_modify(|count| *count = count.saturating_sub(1));
        if *self.inner.paused.borrow() == 0 {
            debug!("Scheduler resumed");
        }
    }
}

/// One job's trip through the lifecycle, run on its own task
struct JobRun {
    core: Arc<JobCore>,
    handler: Arc<dyn JobHandler>,
    ctx: JobContext,
    validator: Arc<dyn SchemaValidator>,
    dependencies: Vec<Job>,
    validate_output: bool,
    paused: watch::Receiver<usize>,
}

impl JobRun {
    async fn execute(self) {
        debug!("Job queued");
        let cancellation = self.core.cancellation().clone();

        let prepared = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                self.finish(JobOutcome::Aborted);
                return;
            }
            prepared = self.prepare() => prepared,
        };

        let argument = match prepared {
            Ok(argument) => argument,
            Err(error) => {
                self.finish(JobOutcome::Failure(Arc::new(error)));
                return;
            }
        };

        if !self.core.emit(JobEvent::Started) {
            return;
        }
        info!("Job started");

        let invocation = AssertUnwindSafe(self.handler.invoke(argument, self.ctx.clone()))
            .catch_unwind()
            .await;

        let outcome = if cancellation.is_cancelled() {
            JobOutcome::Aborted
        } else {
            match invocation {
                Ok(Ok(value)) => self.check_output(value).await,
                Ok(Err(error)) => {
                    let error = JobError::from_handler(self.core.name(), error);
                    if error.is_aborted() {
                        JobOutcome::Aborted
                    } else {
                        JobOutcome::Failure(error)
                    }
                }
                Err(panic) => JobOutcome::Failure(Arc::new(JobError::HandlerExecution {
                    job: self.core.name().to_string(),
                    source: anyhow::anyhow!("handler panicked: {}", panic_message(&*panic)),
                })),
            }
        };

        self.finish(outcome);
    }

    /// Everything that happens while the job is still `Queued`.
    async fn prepare(&self) -> JobResult<JsonValue> {
        self.wait_until_resumed().await;

        for dependency in &self.dependencies {
            if !matches!(dependency.outcome().await, JobOutcome::Success(_)) {
                return Err(JobError::DependencyFailed {
                    job: self.core.name().to_string(),
                    dependency: dependency.name().to_string(),
                });
            }
        }

        let schema = &self.handler.description().argument_schema;
        let outcome = self.validator.validate(schema, self.core.argument()).await;
        if !outcome.success {
            return Err(JobError::ArgumentValidation {
                job: self.core.name().to_string(),
                errors: outcome.errors,
            });
        }

        self.core.set_argument(outcome.value.clone());
        Ok(outcome.value)
    }

    async fn wait_until_resumed(&self) {
        let mut paused = self.paused.clone();
        if *paused.borrow_and_update() > 0 {
            debug!("Waiting for scheduler to resume");
        }
        let _ = paused.wait_for(|count| *count == 0).await;
    }

    async fn check_output(&self, value: JsonValue) -> JobOutcome {
        // A dispatcher's value is the nested job's, already validated there
        if !self.validate_output || self.handler.kind() == HandlerKind::Dispatcher {
            return JobOutcome::Success(value);
        }

        let schema = &self.handler.description().output_schema;
        let outcome = self.validator.validate(schema, value).await;
        if outcome.success {
            JobOutcome::Success(outcome.value)
        } else {
            JobOutcome::Failure(Arc::new(JobError::OutputValidation {
                job: self.core.name().to_string(),
                errors: outcome.errors,
            }))
        }
    }

    fn finish(&self, outcome: JobOutcome) {
        match &outcome {
            JobOutcome::Success(_) => info!("Job succeeded"),
            JobOutcome::Failure(error) => error!(error = %error, "Job failed"),
            JobOutcome::Aborted => info!("Job aborted"),
        }
        self.core.emit(outcome.into_event());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::lift::create_job_handler;
    use crate::jobs::types::{JobDescription, JobState};
    use serde_json::json;

    fn registry_with_echo() -> Arc<JobRegistry> {
        let registry = JobRegistry::new();
        registry
            .register(create_job_handler(
                JobDescription::new("echo").with_argument(json!({"type": "string"})),
                |argument: JsonValue, _ctx| argument,
            ))
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_schedule_runs_registered_job() {
        let scheduler = Scheduler::new(registry_with_echo());
        let job = scheduler.schedule("echo", json!("hello"));

        assert_eq!(job.result().await.unwrap(), json!("hello"));
        assert_eq!(job.state(), JobState::Success);
    }

    #[tokio::test]
    async fn test_unknown_job_fails_synchronously() {
        let scheduler = Scheduler::new(JobRegistry::new());
        let job = scheduler.schedule("missing", json!(null));

        assert_eq!(job.state(), JobState::Failure);
        let error = job.result().await.unwrap_err();
        assert!(matches!(*error, JobError::JobNameNotFound { ref name } if name == "missing"));
    }

    #[tokio::test]
    async fn test_pause_holds_jobs_queued() {
        let scheduler = Scheduler::new(registry_with_echo());
        let guard = scheduler.pause();
        assert!(scheduler.is_paused());

        let job = scheduler.schedule("echo", json!("later"));
        tokio::task::yield_now().await;
        assert_eq!(job.state(), JobState::Queued);

        drop(guard);
        assert!(!scheduler.is_paused());
        assert_eq!(job.result().await.unwrap(), json!("later"));
    }

    #[tokio::test]
    async fn test_stop_while_queued_aborts_before_start() {
        let scheduler = Scheduler::new(registry_with_echo());
        let _guard = scheduler.pause();

        let (job, mut events) = scheduler.schedule_subscribed("echo", json!("x"), ScheduleOptions::new());
        job.stop();

        assert!(matches!(job.outcome().await, JobOutcome::Aborted));
        assert!(matches!(events.recv().await, Some(JobEvent::Aborted)));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_builder_applies_settings() {
        let settings = SchedulerSettings {
            validate_output: false,
            ..SchedulerSettings::default()
        };
        let registry = JobRegistry::new();
        registry
            .register(create_job_handler(
                JobDescription::new("liar").with_output(json!({"type": "string"})),
                |_argument: JsonValue, _ctx| json!(42),
            ))
            .unwrap();

        let scheduler = Scheduler::builder(registry).settings(settings).build();
        assert!(!scheduler.settings().validate_output);

        let job = scheduler.schedule("liar", json!(null));
        assert_eq!(job.result().await.unwrap(), json!(42));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(&*boxed), "kaboom");

        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
