//! Fusion Jobs Library
//!
//! An asynchronous job execution engine: a registry of named,
//! schema-described jobs, a scheduler that validates, launches and tracks
//! their execution, and dispatchers that route one job name to whichever
//! implementation accepts the argument.
//!
//! ```no_run
//! use fusion_jobs::jobs::{create_job_handler, JobDescription, JobRegistry, Scheduler};
//! use serde_json::{json, Value};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let registry = JobRegistry::new();
//! registry.register(create_job_handler(
//!     JobDescription::new("double").with_argument(json!({"type": "number"})),
//!     |argument: Value, _ctx| json!(argument.as_f64().unwrap_or_default() * 2.0),
//! ))?;
//!
//! let scheduler = Scheduler::new(registry);
//! let value = scheduler.schedule("double", json!(21)).result().await?;
//! assert_eq!(value, json!(42.0));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod jobs;
pub mod logger;
pub mod schema;

pub use config::{ConfigLoader, Settings};
pub use jobs::{Job, JobDescription, JobError, JobHandler, JobRegistry, Scheduler};
pub use schema::{BasicSchemaValidator, JsonSchema, SchemaValidator};

pub fn pkg_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
