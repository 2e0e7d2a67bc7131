use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::jobs::error::JobError;
use crate::jobs::logging::LogEntry;
use crate::schema::JsonSchema;

/// Unique name of a job within one registry
pub type JobName = String;

/// Execution state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Started,
    Output,
    InputRequest,
    Success,
    Failure,
    Aborted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure | JobState::Aborted)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Queued` may only start or end early; once started the job emits
    /// outputs and input requests until exactly one terminal state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match self {
            JobState::Queued => matches!(
                next,
                JobState::Started | JobState::Failure | JobState::Aborted
            ),
            JobState::Started | JobState::Output | JobState::InputRequest => {
                !matches!(next, JobState::Queued | JobState::Started)
            }
            JobState::Success | JobState::Failure | JobState::Aborted => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Started => "started",
            JobState::Output => "output",
            JobState::InputRequest => "input_request",
            JobState::Success => "success",
            JobState::Failure => "failure",
            JobState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable metadata describing a job: its name and the schemas of
/// everything flowing in and out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub name: JobName,
    #[serde(default)]
    pub argument_schema: JsonSchema,
    #[serde(default)]
    pub output_schema: JsonSchema,
    #[serde(default)]
    pub input_schema: JsonSchema,
    /// Named side channels and the schema of their messages
    #[serde(default)]
    pub channels: BTreeMap<String, JsonSchema>,
    /// Free-form metadata for tooling
    #[serde(default)]
    pub extensions: Map<String, JsonValue>,
}

impl JobDescription {
    /// A description accepting any argument, output and input.
    pub fn new(name: impl Into<JobName>) -> Self {
        Self {
            name: name.into(),
            argument_schema: JsonSchema::any(),
            output_schema: JsonSchema::any(),
            input_schema: JsonSchema::any(),
            channels: BTreeMap::new(),
            extensions: Map::new(),
        }
    }

    pub fn with_argument(mut self, schema: impl Into<JsonSchema>) -> Self {
        self.argument_schema = schema.into();
        self
    }

    pub fn with_output(mut self, schema: impl Into<JsonSchema>) -> Self {
        self.output_schema = schema.into();
        self
    }

    pub fn with_input(mut self, schema: impl Into<JsonSchema>) -> Self {
        self.input_schema = schema.into();
        self
    }

    pub fn with_channel(mut self, name: impl Into<String>, schema: impl Into<JsonSchema>) -> Self {
        self.channels.insert(name.into(), schema.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}

/// Event emitted by a running job, in the order it happened
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started,
    Output(JsonValue),
    InputRequest { id: u64, request: JsonValue },
    Channel { name: String, message: JsonValue },
    Log(LogEntry),
    Success(JsonValue),
    Failure(Arc<JobError>),
    Aborted,
}

impl JobEvent {
    /// The state this event moves the job into, if it changes state at all.
    pub fn state(&self) -> Option<JobState> {
        match self {
            JobEvent::Started => Some(JobState::Started),
            JobEvent::Output(_) => Some(JobState::Output),
            JobEvent::InputRequest { .. } => Some(JobState::InputRequest),
            JobEvent::Channel { .. } | JobEvent::Log(_) => None,
            JobEvent::Success(_) => Some(JobState::Success),
            JobEvent::Failure(_) => Some(JobState::Failure),
            JobEvent::Aborted => Some(JobState::Aborted),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_some_and(|state| state.is_terminal())
    }
}

/// Terminal result of a job
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success(JsonValue),
    Failure(Arc<JobError>),
    Aborted,
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Success(_) => JobState::Success,
            JobOutcome::Failure(_) => JobState::Failure,
            JobOutcome::Aborted => JobState::Aborted,
        }
    }

    pub(crate) fn into_event(self) -> JobEvent {
        match self {
            JobOutcome::Success(value) => JobEvent::Success(value),
            JobOutcome::Failure(error) => JobEvent::Failure(error),
            JobOutcome::Aborted => JobEvent::Aborted,
        }
    }

    pub(crate) fn from_event(event: &JobEvent) -> Option<Self> {
        match event {
            JobEvent::Success(value) => Some(JobOutcome::Success(value.clone())),
            JobEvent::Failure(error) => Some(JobOutcome::Failure(error.clone())),
            JobEvent::Aborted => Some(JobOutcome::Aborted),
            _ => None,
        }
    }
}
