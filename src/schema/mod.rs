//! Schema validation used to gate job execution.
//!
//! The job engine never interprets schemas itself. It hands a schema and a
//! value to a [`SchemaValidator`] and acts on the [`ValidationOutcome`].
//! [`BasicSchemaValidator`] is the engine shipped with the crate; callers
//! with richer needs plug in their own implementation.

mod basic;
mod validator;

pub use basic::BasicSchemaValidator;
pub use validator::{JsonSchema, SchemaValidator, ValidationIssue, ValidationOutcome};
