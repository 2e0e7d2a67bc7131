use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::jobs::context::JobContext;
use crate::jobs::error::JobError;
use crate::jobs::handler::{HandlerKind, JobHandler};
use crate::jobs::types::{JobDescription, JobName, JobOutcome};

/// Fallback used by a [`Dispatcher`] when no registered job accepts the
/// argument
#[derive(Clone)]
pub enum DefaultJob {
    /// A job looked up in the registry when the dispatch happens
    Named(JobName),
    /// A handler run directly, registered or not
    Handler(Arc<dyn JobHandler>),
}

impl DefaultJob {
    pub fn handler(handler: impl JobHandler + 'static) -> Self {
        DefaultJob::Handler(Arc::new(handler))
    }
}

impl From<&str> for DefaultJob {
    fn from(name: &str) -> Self {
        DefaultJob::Named(name.to_string())
    }
}

impl From<String> for DefaultJob {
    fn from(name: String) -> Self {
        DefaultJob::Named(name)
    }
}

impl From<Arc<dyn JobHandler>> for DefaultJob {
    fn from(handler: Arc<dyn JobHandler>) -> Self {
        DefaultJob::Handler(handler)
    }
}

impl std::fmt::Debug for DefaultJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultJob::Named(name) => f.debug_tuple("Named").field(name).finish(),
            DefaultJob::Handler(handler) => f
                .debug_tuple("Handler")
                .field(&handler.description().name)
                .finish(),
        }
    }
}

/// A job that routes each invocation to another job.
///
/// When scheduled, it walks the registry in registration order (skipping
/// itself and its default) and picks the first job whose argument schema
/// accepts the argument; failing that it runs the default job. The chosen job runs as a
/// child, and its outputs, channel messages, logs and input requests are
/// re-published on the dispatcher's own job, which ends with the child's
/// terminal value.
///
/// Other dispatchers are ordinary candidates, so two dispatchers accepting
/// each other's arguments can route to one another indefinitely.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    description: JobDescription,
    default_job: RwLock<Option<DefaultJob>>,
}

enum Route {
    Registered(JobName),
    Handler(Arc<dyn JobHandler>),
}

/// Create a dispatcher with no default job.
pub fn create_dispatcher(description: JobDescription) -> Dispatcher {
    Dispatcher {
        inner: Arc::new(DispatcherInner {
            description,
            default_job: RwLock::new(None),
        }),
    }
}

impl Dispatcher {
    /// Set the fallback job, replacing any previous one. Takes effect for
    /// dispatches that start afterwards.
    pub fn set_default_job(&self, default_job: impl Into<DefaultJob>) {
        let default_job = default_job.into();
        debug!(
            dispatcher = %self.inner.description.name,
            default = ?default_job,
            "Set dispatcher default job"
        );
        *self
            .inner
            .default_job
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(default_job);
    }

    pub fn default_job(&self) -> Option<DefaultJob> {
        self.inner
            .default_job
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn route(&self, argument: &JsonValue, ctx: &JobContext) -> Option<Route> {
        let own_name = &self.inner.description.name;
        let default_job = self.default_job();
        let default_name = match &default_job {
            Some(DefaultJob::Named(name)) => Some(name.as_str()),
            _ => None,
        };

        for name in ctx.registry().list() {
            if &name == own_name || default_name == Some(name.as_str()) {
                continue;
            }
            let Some(description) = ctx.registry().description(&name) else {
                continue;
            };

            let outcome = ctx
                .validator()
                .validate(&description.argument_schema, argument.clone())
                .await;
            if outcome.success {
                debug!(dispatcher = %own_name, candidate = %name, "Dispatch candidate accepted argument");
                return Some(Route::Registered(name));
            }
        }

        match default_job? {
            DefaultJob::Named(name) => {
                debug!(dispatcher = %own_name, default = %name, "Dispatching to default job");
                Some(Route::Registered(name))
            }
            DefaultJob::Handler(handler) => {
                debug!(
                    dispatcher = %own_name,
                    default = %handler.description().name,
                    "Dispatching to default handler"
                );
                Some(Route::Handler(handler))
            }
        }
    }
}

#[async_trait]
impl JobHandler for Dispatcher {
    fn description(&self) -> &JobDescription {
        &self.inner.description
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Dispatcher
    }

    async fn invoke(&self, argument: JsonValue, ctx: JobContext) -> anyhow::Result<JsonValue> {
        let (nested, mut events) = match self.route(&argument, &ctx).await {
            Some(Route::Registered(name)) => ctx.schedule_job_subscribed(&name, argument),
            Some(Route::Handler(handler)) => ctx.schedule_handler_subscribed(handler, argument),
            None => {
                return Err(JobError::NoJobToHandleDispatch {
                    dispatcher: self.inner.description.name.clone(),
                }
                .into());
            }
        };

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) if event.is_terminal() => break,
                    Some(event) => ctx.forward(event),
                    None => break,
                },
                Ok(input) = ctx.next_input() => {
                    if let Err(error) = nested.send_input(input).await {
                        warn!(job = %nested.name(), error = %error, "Dropped input for dispatched job");
                    }
                }
            }
        }

        match nested.outcome().await {
            JobOutcome::Success(value) => Ok(value),
            JobOutcome::Failure(error) => Err(anyhow::Error::from(error)),
            JobOutcome::Aborted => Err(JobError::Aborted {
                job: ctx.job_name().to_string(),
            }
            .into()),
        }
    }
}
