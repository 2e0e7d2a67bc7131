//! Execution handle for one scheduled job.
//!
//! Every job owns a small core shared between the scheduler task running
//! it and the [`Job`] handles given to callers:
//! - `state` (watch) holds the current [`JobState`]
//! - `output` (watch) holds the latest output value only
//! - `outcome` (watch) is set once, on the terminal event
//! - each subscriber owns an unbounded queue fed with every event
//! - `input` (mpsc) carries caller-supplied input to the handler
//!
//! All transitions go through one gate so each subscriber observes the same
//! order, and nothing is delivered after the terminal event.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, Stream};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::types::{JobEvent, JobName, JobOutcome, JobState};
use crate::schema::{JsonSchema, SchemaValidator};

pub(crate) struct JobCore {
    id: Uuid,
    name: JobName,
    gate: Mutex<CoreState>,
    backlog_warning: usize,
    state: watch::Sender<JobState>,
    output: watch::Sender<Option<JsonValue>>,
    outcome: watch::Sender<Option<JobOutcome>>,
    input: mpsc::Sender<JsonValue>,
    input_schema: JsonSchema,
    validator: Arc<dyn SchemaValidator>,
    cancellation: CancellationToken,
}

struct CoreState {
    argument: JsonValue,
    next_request_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Sending half of one [`JobEvents`] subscription.
struct Subscriber {
    sender: mpsc::UnboundedSender<JobEvent>,
    pending: Arc<AtomicUsize>,
    warned: bool,
}

impl Subscriber {
    /// Queue one event. Returns `false` once the receiving side is gone.
    fn deliver(&mut self, event: &JobEvent, backlog_warning: usize, job: &str) -> bool {
        // Counted before sending so the reader never decrements first
        let pending = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sender.send(event.clone()).is_err() {
            return false;
        }

        if pending < backlog_warning {
            self.warned = false;
        } else if !self.warned {
            warn!(job = %job, pending, "Job event subscriber is falling behind");
            self.warned = true;
        }
        true
    }
}

/// Channel sizing for a new job core
#[derive(Debug, Clone, Copy)]
pub(crate) struct CoreBuffers {
    /// Undelivered events per subscriber before a slow-subscriber warning
    pub events: usize,
    pub input: usize,
}

impl JobCore {
    pub(crate) fn new(
        name: &str,
        argument: JsonValue,
        input_schema: JsonSchema,
        validator: Arc<dyn SchemaValidator>,
        cancellation: CancellationToken,
        buffers: CoreBuffers,
    ) -> (Arc<Self>, mpsc::Receiver<JsonValue>) {
        let (input, input_rx) = mpsc::channel(buffers.input.max(1));

        let core = Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            gate: Mutex::new(CoreState {
                argument,
                next_request_id: 0,
                subscribers: Vec::new(),
            }),
            backlog_warning: buffers.events.max(1),
            state: watch::Sender::new(JobState::Queued),
            output: watch::Sender::new(None),
            outcome: watch::Sender::new(None),
            input,
            input_schema,
            validator,
            cancellation,
        });

        (core, input_rx)
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub(crate) fn argument(&self) -> JsonValue {
        self.lock().argument.clone()
    }

    pub(crate) fn set_argument(&self, argument: JsonValue) {
        self.lock().argument = argument;
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one event. Returns `false` when the event was dropped because
    /// the job is already terminal or the transition is not allowed.
    pub(crate) fn emit(&self, event: JobEvent) -> bool {
        let mut state = self.lock();
        self.emit_locked(&mut state, event)
    }

    /// Emit an input request, allocating its id under the same gate.
    pub(crate) fn emit_input_request(&self, request: JsonValue) -> Option<u64> {
        let mut state = self.lock();
        let id = state.next_request_id;
        if !self.emit_locked(&mut state, JobEvent::InputRequest { id, request }) {
            return None;
        }
        state.next_request_id += 1;
        Some(id)
    }

    fn emit_locked(&self, gate: &mut CoreState, event: JobEvent) -> bool {
        let current = *self.state.borrow();
        if current.is_terminal() {
            debug!(job = %self.name, job_id = %self.id, "Dropping event after terminal state");
            return false;
        }

        let next = event.state();
        if let Some(next) = next {
            if !current.can_transition_to(next) {
                warn!(
                    job = %self.name,
                    job_id = %self.id,
                    from = %current,
                    to = %next,
                    "Rejected job state transition"
                );
                return false;
            }
        }

        // Output is published before the state so that a reader seeing a
        // terminal state also sees the final value.
        match &event {
            JobEvent::Output(value) => {
                self.output.send_replace(Some(value.clone()));
            }
            JobEvent::Success(value) => {
                self.output.send_if_modified(|latest| {
                    if latest.as_ref() == Some(value) {
                        return false;
                    }
                    *latest = Some(value.clone());
                    true
                });
            }
            _ => {}
        }

        if let Some(next) = next {
            self.state.send_replace(next);
        }
        if let Some(outcome) = JobOutcome::from_event(&event) {
            self.outcome.send_replace(Some(outcome));
        }

        gate.subscribers
            .retain_mut(|subscriber| subscriber.deliver(&event, self.backlog_warning, &self.name));
        if event.is_terminal() {
            // Dropping the senders closes every subscription after the terminal event
            gate.subscribers.clear();
        }
        true
    }

    pub(crate) fn subscribe(&self) -> JobEvents {
        let mut gate = self.lock();
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let finished = self.state.borrow().is_terminal();

        if !finished {
            gate.subscribers.push(Subscriber {
                sender,
                pending: pending.clone(),
                warned: false,
            });
        }

        JobEvents {
            receiver,
            pending,
            finished,
        }
    }

    async fn send_input(&self, value: JsonValue) -> JobResult<()> {
        if self.state().is_terminal() {
            return Err(JobError::InputClosed {
                job: self.name.clone(),
            });
        }

        let outcome = self.validator.validate(&self.input_schema, value).await;
        if !outcome.success {
            return Err(JobError::InputValidation {
                job: self.name.clone(),
                errors: outcome.errors,
            });
        }

        let mut state = self.state.subscribe();
        tokio::select! {
            sent = self.input.send(outcome.value) => sent.map_err(|_| JobError::InputClosed {
                job: self.name.clone(),
            }),
            _ = async { let _ = state.wait_for(JobState::is_terminal).await; } => Err(JobError::InputClosed {
                job: self.name.clone(),
            }),
        }
    }
}

/// Handle to a scheduled job.
///
/// Cheap to clone; every clone observes the same job.
#[derive(Clone)]
pub struct Job {
    core: Arc<JobCore>,
}

impl Job {
    pub(crate) fn new(core: Arc<JobCore>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> JobState {
        self.core.state()
    }

    /// Watch the job state. Intermediate states may be coalesced; use
    /// [`subscribe`](Self::subscribe) to see every event.
    pub fn state_changes(&self) -> watch::Receiver<JobState> {
        self.core.state.subscribe()
    }

    /// The argument the handler runs with (schema-applied once validated).
    pub fn argument(&self) -> JsonValue {
        self.core.argument()
    }

    /// Subscribe to the events emitted from now on.
    pub fn subscribe(&self) -> JobEvents {
        self.core.subscribe()
    }

    /// Replay-latest output channel.
    pub fn output(&self) -> watch::Receiver<Option<JsonValue>> {
        self.core.output.subscribe()
    }

    pub fn latest_output(&self) -> Option<JsonValue> {
        self.core.output.borrow().clone()
    }

    /// Stream of outputs: the latest value first (if any), then every new
    /// value until the job reaches a terminal state.
    pub fn outputs(&self) -> impl Stream<Item = JsonValue> + Send + 'static {
        let mut output = self.core.output.subscribe();
        output.mark_changed();
        let state = self.core.state.subscribe();

        stream::unfold((output, state), |(mut output, mut state)| async move {
            loop {
                if output.has_changed().unwrap_or(false) {
                    let latest = output.borrow_and_update().clone();
                    if let Some(value) = latest {
                        return Some((value, (output, state)));
                    }
                    continue;
                }

                if state.borrow_and_update().is_terminal() {
                    return None;
                }

                tokio::select! {
                    changed = output.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                        output.mark_changed();
                    }
                    changed = state.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        })
    }

    /// Supply input to the job. The value is validated against the job's
    /// input schema before it is queued.
    pub async fn send_input(&self, value: JsonValue) -> JobResult<()> {
        self.core.send_input(value).await
    }

    /// Request cooperative cancellation.
    ///
    /// The job ends `Aborted` once its handler observes the signal and
    /// returns; a handler that never checks keeps running.
    pub fn stop(&self) {
        if !self.core.cancellation.is_cancelled() {
            debug!(job = %self.core.name, job_id = %self.core.id, "Stopping job");
        }
        self.core.cancellation.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.core.cancellation.is_cancelled()
    }

    /// Wait for the terminal state.
    pub async fn outcome(&self) -> JobOutcome {
        let mut outcome = self.core.outcome.subscribe();
        loop {
            if let Some(done) = outcome.borrow_and_update().clone() {
                return done;
            }
            if outcome.changed().await.is_err() {
                return outcome.borrow().clone().unwrap_or(JobOutcome::Aborted);
            }
        }
    }

    /// Wait for the terminal state, resolving to the final value or the
    /// failure. An aborted job yields [`JobError::Aborted`].
    pub async fn result(&self) -> Result<JsonValue, Arc<JobError>> {
        match self.outcome().await {
            JobOutcome::Success(value) => Ok(value),
            JobOutcome::Failure(error) => Err(error),
            JobOutcome::Aborted => Err(Arc::new(JobError::Aborted {
                job: self.core.name.clone(),
            })),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Ordered subscription to a job's events, ending after the terminal event.
///
/// Every event emitted after the subscription was opened is delivered; a
/// slow reader only delays them.
pub struct JobEvents {
    receiver: mpsc::UnboundedReceiver<JobEvent>,
    pending: Arc<AtomicUsize>,
    finished: bool,
}

impl JobEvents {
    /// Next event, or `None` once the terminal event has been delivered.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        if self.finished {
            return None;
        }

        match self.receiver.recv().await {
            Some(event) => {
                self.pending.fetch_sub(1, Ordering::Relaxed);
                self.finished = event.is_terminal();
                Some(event)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = JobEvent> + Send + 'static {
        stream::unfold(self, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
    }
}
