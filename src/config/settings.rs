//! Configuration settings loaded from TOML files and environment variables

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::error::ConfigError;
use crate::logger::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig};

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "fusion-jobs".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_true() -> bool {
    true
}

fn default_event_buffer() -> usize {
    256
}

fn default_input_buffer() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_path() -> String {
    "logs/jobs.log".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

// ============================================================================
// Application
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Engine-wide scheduling behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SchedulerSettings {
    /// Validate final values against the job's output schema
    #[serde(default = "default_true")]
    pub validate_output: bool,

    /// Fill in schema `default`s for missing object properties
    #[serde(default = "default_true")]
    pub use_defaults: bool,

    /// Undelivered events per subscriber before a slow-subscriber warning
    #[serde(default = "default_event_buffer")]
    #[validate(range(min = 1, message = "event_buffer must be at least 1"))]
    pub event_buffer: usize,

    /// Input values queued per job before `send_input` waits
    #[serde(default = "default_input_buffer")]
    #[validate(range(min = 1, message = "input_buffer must be at least 1"))]
    pub input_buffer: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            validate_output: default_true(),
            use_defaults: default_true(),
            event_buffer: default_event_buffer(),
            input_buffer: default_input_buffer(),
        }
    }
}

// ============================================================================
// Logger Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            colored: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub append: bool,

    /// "full", "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            append: default_true(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// "trace", "debug", "info", "warn" or "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub console: ConsoleSettings,

    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Convert the file representation into the runtime [`LoggerConfig`].
    pub fn into_logger_config(self) -> Result<LoggerConfig, ConfigError> {
        let console = ConsoleConfig::new(self.console.enabled, self.console.colored);
        let file = self.file.into_file_config()?;

        LoggerConfig::new(console, file, self.level).map_err(|e| ConfigError::ValidationError {
            field: "logger".to_string(),
            message: e.to_string(),
        })
    }
}

impl FileSettings {
    pub fn into_file_config(self) -> Result<FileConfig, ConfigError> {
        let format = self
            .format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::validation("logger.file.format", &e.to_string()))?;

        FileConfig::new(self.enabled, PathBuf::from(self.path), self.append, format).map_err(|e| {
            ConfigError::ValidationError {
                field: "logger.file".to_string(),
                message: e.to_string(),
            }
        })
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub logger: LoggerSettings,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ========================================================================
    // Arbitrary implementations for property-based testing
    // ========================================================================

    fn arb_scheduler_settings() -> impl Strategy<Value = SchedulerSettings> {
        (any::<bool>(), any::<bool>(), 1usize..=4096, 1usize..=1024).prop_map(
            |(validate_output, use_defaults, event_buffer, input_buffer)| SchedulerSettings {
                validate_output,
                use_defaults,
                event_buffer,
                input_buffer,
            },
        )
    }

    fn arb_logger_settings() -> impl Strategy<Value = LoggerSettings> {
        (
            prop_oneof![
                Just("trace".to_string()),
                Just("debug".to_string()),
                Just("info".to_string()),
                Just("warn".to_string()),
                Just("error".to_string()),
            ],
            any::<bool>(),
            "[a-z]{1,8}/[a-z]{1,8}\\.log",
            prop_oneof![
                Just("full".to_string()),
                Just("compact".to_string()),
                Just("json".to_string()),
            ],
        )
            .prop_map(|(level, colored, path, format)| LoggerSettings {
                level,
                console: ConsoleSettings {
                    enabled: true,
                    colored,
                },
                file: FileSettings {
                    enabled: false,
                    path,
                    append: true,
                    format,
                },
            })
    }

    fn arb_settings() -> impl Strategy<Value = Settings> {
        (arb_scheduler_settings(), arb_logger_settings()).prop_map(|(scheduler, logger)| Settings {
            application: ApplicationConfig::default(),
            scheduler,
            logger,
        })
    }

    proptest! {
        #[test]
        fn prop_settings_toml_roundtrip(settings in arb_settings()) {
            let text = toml_text(&settings);
            let parsed: Settings = config::Config::builder()
                .add_source(config::File::from_str(&text, config::FileFormat::Toml))
                .build()
                .unwrap()
                .try_deserialize()
                .unwrap();
            prop_assert_eq!(parsed, settings);
        }

        #[test]
        fn prop_generated_scheduler_settings_validate(settings in arb_scheduler_settings()) {
            prop_assert!(settings.validate().is_ok());
        }
    }

    fn toml_text(settings: &Settings) -> String {
        format!(
            r#"
[application]
name = "{}"
version = "{}"

[scheduler]
validate_output = {}
use_defaults = {}
event_buffer = {}
input_buffer = {}

[logger]
level = "{}"

[logger.console]
enabled = {}
colored = {}

[logger.file]
enabled = {}
path = "{}"
append = {}
format = "{}"
"#,
            settings.application.name,
            settings.application.version,
            settings.scheduler.validate_output,
            settings.scheduler.use_defaults,
            settings.scheduler.event_buffer,
            settings.scheduler.input_buffer,
            settings.logger.level,
            settings.logger.console.enabled,
            settings.logger.console.colored,
            settings.logger.file.enabled,
            settings.logger.file.path,
            settings.logger.file.append,
            settings.logger.file.format,
        )
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.scheduler.validate_output);
        assert!(settings.scheduler.use_defaults);
        assert_eq!(settings.scheduler.event_buffer, 256);
        assert_eq!(settings.scheduler.input_buffer, 16);
        assert_eq!(settings.logger.level, "info");
        assert_eq!(settings.logger.file.path, "logs/jobs.log");
        assert_eq!(settings.application.name, "fusion-jobs");
    }

    #[test]
    fn test_zero_buffer_fails_validation() {
        let settings = SchedulerSettings {
            event_buffer: 0,
            ..SchedulerSettings::default()
        };
        let errors = settings.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("event_buffer"));
    }

    #[test]
    fn test_logger_settings_convert() {
        let config = LoggerSettings::default().into_logger_config().unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.file.format, LogFormat::Json);
        assert!(config.console.enabled);
    }

    #[test]
    fn test_logger_settings_invalid_format() {
        let settings = LoggerSettings {
            file: FileSettings {
                format: "yaml".to_string(),
                ..FileSettings::default()
            },
            ..LoggerSettings::default()
        };
        let error = settings.into_logger_config().unwrap_err();
        assert!(matches!(error, ConfigError::ValidationError { ref field, .. } if field == "logger.file.format"));
    }
}
