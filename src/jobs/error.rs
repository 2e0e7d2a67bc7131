use std::sync::Arc;

use thiserror::Error;

use crate::schema::ValidationIssue;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {name}")]
    JobNameNotFound { name: String },

    #[error("Job already registered: {name}")]
    DuplicateJobName { name: String },

    #[error("Invalid argument for job {job}: {}", join_issues(.errors))]
    ArgumentValidation {
        job: String,
        errors: Vec<ValidationIssue>,
    },

    #[error("Invalid output from job {job}: {}", join_issues(.errors))]
    OutputValidation {
        job: String,
        errors: Vec<ValidationIssue>,
    },

    #[error("Invalid input for job {job}: {}", join_issues(.errors))]
    InputValidation {
        job: String,
        errors: Vec<ValidationIssue>,
    },

    #[error("Invalid message on channel {channel} of job {job}: {}", join_issues(.errors))]
    ChannelValidation {
        job: String,
        channel: String,
        errors: Vec<ValidationIssue>,
    },

    #[error("Job {job} has no channel named {channel}")]
    UnknownChannel { job: String, channel: String },

    #[error("Job execution failed for {job}: {source}")]
    HandlerExecution {
        job: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("No job to handle dispatch for {dispatcher}")]
    NoJobToHandleDispatch { dispatcher: String },

    #[error("Job {job} completed without producing a value")]
    NoOutputProduced { job: String },

    #[error("Dependency {dependency} of job {job} did not succeed")]
    DependencyFailed { job: String, dependency: String },

    #[error("Job {job} was aborted")]
    Aborted { job: String },

    #[error("Job {job} no longer accepts input")]
    InputClosed { job: String },
}

impl JobError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, JobError::Aborted { .. })
    }

    /// Structured validation issues carried by validation failures.
    pub fn validation_issues(&self) -> &[ValidationIssue] {
        match self {
            JobError::ArgumentValidation { errors, .. }
            | JobError::OutputValidation { errors, .. }
            | JobError::InputValidation { errors, .. }
            | JobError::ChannelValidation { errors, .. } => errors,
            _ => &[],
        }
    }

    /// Classify an error returned by a handler body.
    ///
    /// Engine errors are kept verbatim, a nested job's shared failure is
    /// re-used as is, and anything else is wrapped as a handler failure.
    pub(crate) fn from_handler(job: &str, error: anyhow::Error) -> Arc<JobError> {
        let error = match error.downcast::<JobError>() {
            Ok(error) => return Arc::new(error),
            Err(error) => error,
        };

        match error.downcast::<Arc<JobError>>() {
            Ok(shared) => shared,
            Err(source) => Arc::new(JobError::HandlerExecution {
                job: job.to_string(),
                source,
            }),
        }
    }
}

fn join_issues(errors: &[ValidationIssue]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_validation_message_lists_issues() {
        let error = JobError::ArgumentValidation {
            job: "build".to_string(),
            errors: vec![
                ValidationIssue::new("", "must be object"),
                ValidationIssue::new("/target", "must be string"),
            ],
        };
        assert_eq!(
            error.to_string(),
            "Invalid argument for job build: /: must be object; /target: must be string"
        );
        assert_eq!(error.validation_issues().len(), 2);
    }

    #[test]
    fn test_from_handler_keeps_engine_errors() {
        let error = anyhow::Error::from(JobError::NoOutputProduced {
            job: "scan".to_string(),
        });
        let classified = JobError::from_handler("scan", error);
        assert!(matches!(*classified, JobError::NoOutputProduced { .. }));
    }

    #[test]
    fn test_from_handler_reuses_shared_failures() {
        let nested = Arc::new(JobError::JobNameNotFound {
            name: "missing".to_string(),
        });
        let classified = JobError::from_handler("outer", anyhow::Error::from(nested.clone()));
        assert!(Arc::ptr_eq(&nested, &classified));
    }

    #[test]
    fn test_from_handler_wraps_foreign_errors() {
        let classified = JobError::from_handler("outer", anyhow::anyhow!("disk full"));
        match &*classified {
            JobError::HandlerExecution { job, source } => {
                assert_eq!(job, "outer");
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("Expected HandlerExecution, got {:?}", other),
        }
    }
}
