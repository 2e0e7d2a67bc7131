use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use indexmap::IndexMap;
use tracing::debug;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::handler::JobHandler;
use crate::jobs::types::{JobDescription, JobName};

/// Registry mapping job names to handlers, in registration order
#[derive(Default)]
pub struct JobRegistry {
    handlers: RwLock<IndexMap<JobName, Arc<dyn JobHandler>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its description's name.
    ///
    /// Fails with [`JobError::DuplicateJobName`] if the name is taken; the
    /// existing entry is left untouched. Concurrent registrations of the
    /// same name are serialized, so exactly one of them succeeds.
    pub fn register<H>(&self, handler: H) -> JobResult<()>
    where
        H: JobHandler + 'static,
    {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&self, handler: Arc<dyn JobHandler>) -> JobResult<()> {
        let name = handler.description().name.clone();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);

        if handlers.contains_key(&name) {
            return Err(JobError::DuplicateJobName { name });
        }

        debug!(job = %name, kind = ?handler.kind(), "Registered job handler");
        handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn description(&self, name: &str) -> Option<JobDescription> {
        self.read()
            .get(name)
            .map(|handler| handler.description().clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Lazily list registered names in registration order.
    ///
    /// The listing reads the registry as it advances rather than taking a
    /// snapshot.
    pub fn list(&self) -> JobNames<'_> {
        JobNames {
            registry: self,
            position: 0,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<JobName, Arc<dyn JobHandler>>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lazy, restartable iterator over registered job names
#[derive(Clone)]
pub struct JobNames<'a> {
    registry: &'a JobRegistry,
    position: usize,
}

impl JobNames<'_> {
    /// Start over from the first registered name.
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for JobNames<'_> {
    type Item = JobName;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self
            .registry
            .read()
            .get_index(self.position)
            .map(|(name, _)| name.clone())?;
        self.position += 1;
        Some(name)
    }
}
