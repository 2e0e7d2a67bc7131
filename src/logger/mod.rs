//! Logger setup
//!
//! A `tracing-subscriber` stack with support for:
//! - Console output with color control
//! - File output with multiple formats (Full, Compact, JSON)
//!
//! Job log entries reach this stack through
//! [`TracingLogSink`](crate::jobs::TracingLogSink).

pub mod config;
pub mod error;
pub mod writer;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig};
pub use error::LoggerError;
pub use writer::FileWriter;

use std::io::IsTerminal;

use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Install the global subscriber described by `config`.
///
/// Fails if the configuration is invalid, the log file cannot be opened, or
/// a global subscriber is already set.
pub fn init_logger(config: LoggerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = if config.file.enabled {
        Some(file_layer(&config.file)?)
    } else {
        None
    };
    let console_layer = config.console.enabled.then(|| console_layer(&config.console));

    // The file layer goes first so console ANSI settings never leak into
    // span fields written to the file.
    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInitialized {
            message: e.to_string(),
        })?;

    Ok(())
}

fn console_layer<S>(config: &ConsoleConfig) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let use_ansi = config.colored && std::io::stdout().is_terminal();

    fmt::layer()
        .with_ansi(use_ansi)
        .with_target(true)
        .with_level(true)
        .boxed()
}

fn file_layer<S>(config: &FileConfig) -> Result<BoxedLayer<S>, LoggerError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer = FileWriter::new(config)?;
    let layer = fmt::layer().with_ansi(false).with_writer(writer);

    Ok(match config.format {
        LogFormat::Full => layer.with_target(true).boxed(),
        LogFormat::Compact => layer.with_target(true).compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_rejects_invalid_config() {
        let config = LoggerConfig {
            level: "chatty".to_string(),
            ..LoggerConfig::default()
        };
        assert!(init_logger(config).is_err());
    }

    #[test]
    fn test_init_rejects_no_outputs() {
        let config = LoggerConfig {
            console: ConsoleConfig::new(false, false),
            ..LoggerConfig::default()
        };
        assert!(init_logger(config).is_err());
    }

    #[test]
    fn test_file_layer_creates_log_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/jobs.log");
        let config = FileConfig::new(true, path.clone(), true, LogFormat::Compact).unwrap();

        let _layer: BoxedLayer<tracing_subscriber::Registry> = file_layer(&config).unwrap();
        assert!(path.exists());
    }
}
