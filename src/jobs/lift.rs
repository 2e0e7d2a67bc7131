//! Lifting plain functions into [`JobHandler`]s.
//!
//! A body passed to [`create_job_handler`] returns anything convertible into
//! a [`JobBehavior`]:
//! - a value (or `anyhow::Result`) becomes the terminal `Success` directly
//! - a future is awaited for the final value
//! - a stream emits every item as `Output`; the last item is the final value

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::FutureExt;
use serde_json::Value as JsonValue;

use crate::jobs::context::JobContext;
use crate::jobs::error::JobError;
use crate::jobs::handler::{HandlerKind, JobHandler};
use crate::jobs::types::JobDescription;

/// What a lifted job body produces
pub enum JobBehavior {
    Ready(anyhow::Result<JsonValue>),
    Deferred(BoxFuture<'static, anyhow::Result<JsonValue>>),
    Sequence(BoxStream<'static, anyhow::Result<JsonValue>>),
}

impl JobBehavior {
    pub fn value(value: JsonValue) -> Self {
        JobBehavior::Ready(Ok(value))
    }

    pub fn error(error: impl Into<anyhow::Error>) -> Self {
        JobBehavior::Ready(Err(error.into()))
    }

    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
    {
        JobBehavior::Deferred(future.boxed())
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = JsonValue> + Send + 'static,
    {
        JobBehavior::Sequence(stream.map(Ok).boxed())
    }

    /// A stream whose items may fail; the first error ends the job.
    pub fn try_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = anyhow::Result<JsonValue>> + Send + 'static,
    {
        JobBehavior::Sequence(stream.boxed())
    }
}

impl From<JsonValue> for JobBehavior {
    fn from(value: JsonValue) -> Self {
        JobBehavior::value(value)
    }
}

impl From<anyhow::Result<JsonValue>> for JobBehavior {
    fn from(result: anyhow::Result<JsonValue>) -> Self {
        JobBehavior::Ready(result)
    }
}

type JobBody = Box<dyn Fn(JsonValue, JobContext) -> JobBehavior + Send + Sync>;

/// Handler built by [`create_job_handler`]
pub struct FnJobHandler {
    description: JobDescription,
    body: JobBody,
}

/// Lift a function into a [`JobHandler`] with the given description.
///
/// A description built with [`JobDescription::new`] accepts any argument
/// and output.
pub fn create_job_handler<F, B>(description: JobDescription, body: F) -> FnJobHandler
where
    F: Fn(JsonValue, JobContext) -> B + Send + Sync + 'static,
    B: Into<JobBehavior>,
{
    FnJobHandler {
        description,
        body: Box::new(move |argument, ctx| body(argument, ctx).into()),
    }
}

#[async_trait]
impl JobHandler for FnJobHandler {
    fn description(&self) -> &JobDescription {
        &self.description
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Function
    }

    async fn invoke(&self, argument: JsonValue, ctx: JobContext) -> anyhow::Result<JsonValue> {
        match (self.body)(argument, ctx.clone()) {
            JobBehavior::Ready(result) => result,
            JobBehavior::Deferred(future) => future.await,
            JobBehavior::Sequence(stream) => drain(stream, &ctx).await,
        }
    }
}

async fn drain(
    mut stream: BoxStream<'static, anyhow::Result<JsonValue>>,
    ctx: &JobContext,
) -> anyhow::Result<JsonValue> {
    let mut last = None;

    loop {
        let item = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                return Err(JobError::Aborted {
                    job: ctx.job_name().to_string(),
                }
                .into());
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(value)) => {
                ctx.emit_output(value.clone());
                last = Some(value);
            }
            Some(Err(error)) => return Err(error),
            None => break,
        }
    }

    last.ok_or_else(|| {
        JobError::NoOutputProduced {
            job: ctx.job_name().to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::registry::JobRegistry;
    use crate::jobs::scheduler::{ScheduleOptions, Scheduler};
    use crate::jobs::types::{JobEvent, JobOutcome};
    use futures::stream;
    use serde_json::json;

    fn scheduler_with(handler: FnJobHandler) -> Scheduler {
        let registry = JobRegistry::new();
        registry.register(handler).unwrap();
        Scheduler::new(registry)
    }

    #[tokio::test]
    async fn test_plain_value_succeeds_without_output_events() {
        let scheduler = scheduler_with(create_job_handler(
            JobDescription::new("double"),
            |argument: JsonValue, _ctx| json!(argument.as_i64().unwrap_or(0) * 2),
        ));

        let (job, mut events) = scheduler.schedule_subscribed("double", json!(21), ScheduleOptions::new());
        assert_eq!(job.result().await.unwrap(), json!(42));

        assert!(matches!(events.recv().await, Some(JobEvent::Started)));
        assert!(matches!(events.recv().await, Some(JobEvent::Success(ref v)) if v == &json!(42)));
    }

    #[tokio::test]
    async fn test_future_is_awaited() {
        let scheduler = scheduler_with(create_job_handler(
            JobDescription::new("later"),
            |argument: JsonValue, _ctx| {
                JobBehavior::future(async move {
                    tokio::task::yield_now().await;
                    Ok(json!({"got": argument}))
                })
            },
        ));

        let job = scheduler.schedule("later", json!("x"));
        assert_eq!(job.result().await.unwrap(), json!({"got": "x"}));
    }

    #[tokio::test]
    async fn test_stream_emits_outputs_and_ends_with_last_item() {
        let scheduler = scheduler_with(create_job_handler(
            JobDescription::new("count"),
            |_argument: JsonValue, _ctx| JobBehavior::stream(stream::iter([json!(1), json!(2), json!(3)])),
        ));

        let (job, mut events) = scheduler.schedule_subscribed("count", json!(null), ScheduleOptions::new());
        assert_eq!(job.result().await.unwrap(), json!(3));

        let mut outputs = Vec::new();
        while let Some(event) = events.recv().await {
            if let JobEvent::Output(value) = event {
                outputs.push(value);
            }
        }
        assert_eq!(outputs, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_empty_stream_is_no_output_failure() {
        let scheduler = scheduler_with(create_job_handler(
            JobDescription::new("nothing"),
            |_argument: JsonValue, _ctx| JobBehavior::stream(stream::empty()),
        ));

        let error = scheduler.schedule("nothing", json!(null)).result().await.unwrap_err();
        assert!(matches!(*error, JobError::NoOutputProduced { .. }));
    }

    #[tokio::test]
    async fn test_body_error_becomes_handler_failure() {
        let scheduler = scheduler_with(create_job_handler(
            JobDescription::new("broken"),
            |_argument: JsonValue, _ctx| -> anyhow::Result<JsonValue> { Err(anyhow::anyhow!("no disk")) },
        ));

        let job = scheduler.schedule("broken", json!(null));
        match job.outcome().await {
            JobOutcome::Failure(error) => {
                assert!(matches!(*error, JobError::HandlerExecution { .. }));
                assert!(error.to_string().contains("no disk"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_body_becomes_handler_failure() {
        let scheduler = scheduler_with(create_job_handler(
            JobDescription::new("panics"),
            |_argument: JsonValue, _ctx| -> JsonValue { panic!("bad state") },
        ));

        let error = scheduler.schedule("panics", json!(null)).result().await.unwrap_err();
        assert!(matches!(*error, JobError::HandlerExecution { .. }));
        assert!(error.to_string().contains("bad state"));
    }

    #[tokio::test]
    async fn test_stopped_stream_aborts() {
        let scheduler = scheduler_with(create_job_handler(
            JobDescription::new("forever"),
            |_argument: JsonValue, _ctx| JobBehavior::stream(stream::pending()),
        ));

        let job = scheduler.schedule("forever", json!(null));
        let mut state = job.state_changes();
        state.wait_for(|s| *s == crate::jobs::types::JobState::Started).await.unwrap();

        job.stop();
        assert!(matches!(job.outcome().await, JobOutcome::Aborted));
    }

    #[test]
    fn test_handler_kind_is_function() {
        let handler = create_job_handler(JobDescription::new("f"), |argument: JsonValue, _ctx| argument);
        assert_eq!(handler.kind(), HandlerKind::Function);
        assert_eq!(handler.description().name, "f");
    }
}
