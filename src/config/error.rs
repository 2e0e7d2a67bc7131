//! Configuration error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {field} - {message}")]
    ValidationError { field: String, message: String },

    #[error("Environment variable error: {0}")]
    EnvVarError(String),

    #[error("Mutual exclusivity error: {0}")]
    MutualExclusivityError(String),

    /// Generic configuration error from the config crate
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        ConfigError::FileNotFound(path.into())
    }

    pub fn mutual_exclusivity(message: impl Into<String>) -> Self {
        ConfigError::MutualExclusivityError(message.into())
    }

    /// First failing field of a `validator` run, keyed under `section`.
    ///
    /// Fields are visited in name order so the reported error is stable.
    pub fn from_validation(section: &str, errors: &validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let mut fields: Vec<_> = field_errors.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));

        let Some((field, failures)) = fields.into_iter().next() else {
            return ConfigError::validation(section, errors.to_string());
        };

        let message = match failures.first() {
            Some(failure) => failure
                .message
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("failed {} check", failure.code)),
            None => "invalid value".to_string(),
        };

        ConfigError::validation(format!("{}.{}", section, field), message)
    }
}
