//! Layered configuration loading

use std::path::{Path, PathBuf};

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use tracing::debug;

use crate::config::environment::{Environment as AppEnvironment, DEFAULT_LAYER};
use crate::config::error::ConfigError;
use crate::config::settings::Settings;

const CONFIG_DIR_ENV: &str = "FUSION_JOBS_CONFIG_DIR";

const CONFIG_FILE_ENV: &str = "FUSION_JOBS_CONFIG_FILE";

const DEFAULT_CONFIG_DIR: &str = "config";

/// Prefix of environment variable overrides
const ENV_PREFIX: &str = "FUSION_JOBS";

/// Separator for nested keys in environment variables
const ENV_SEPARATOR: &str = "__";

/// Loads [`Settings`] from layered sources.
///
/// Sources in order of priority, lowest first:
/// 1. `default.toml` (required)
/// 2. `{environment}.toml` (optional)
/// 3. `local.toml` (optional, skipped in the `test` environment)
/// 4. `FUSION_JOBS_*` environment variables
///
/// With `FUSION_JOBS_CONFIG_FILE` set, that single file replaces the three
/// file layers.
#[derive(Debug)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    config_file: Option<PathBuf>,
    environment: AppEnvironment,
}

impl ConfigLoader {
    /// Create a loader from `FUSION_JOBS_CONFIG_DIR`,
    /// `FUSION_JOBS_CONFIG_FILE` and `FUSION_JOBS_APP_ENV`.
    ///
    /// # Errors
    ///
    /// Fails if both `FUSION_JOBS_CONFIG_DIR` and `FUSION_JOBS_CONFIG_FILE`
    /// are set.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from);
        let config_file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);

        if config_dir.is_some() && config_file.is_some() {
            return Err(ConfigError::mutual_exclusivity(format!(
                "{} and {} cannot both be set. Use {} for layered configuration or \
                 {} for a single configuration file.",
                CONFIG_DIR_ENV, CONFIG_FILE_ENV, CONFIG_DIR_ENV, CONFIG_FILE_ENV
            )));
        }

        Ok(Self {
            config_dir: config_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR)),
            config_file,
            environment: AppEnvironment::from_env(),
        })
    }

    /// Loader for an explicit directory, ignoring the directory and file
    /// variables.
    pub fn from_dir(config_dir: impl Into<PathBuf>, environment: AppEnvironment) -> Self {
        Self {
            config_dir: config_dir.into(),
            config_file: None,
            environment,
        }
    }

    pub fn environment(&self) -> AppEnvironment {
        self.environment
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load, deserialize and validate settings from all sources.
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let config = self.build_config()?;
        let settings: Settings = config.try_deserialize().map_err(|e| {
            ConfigError::ParseError(format!("Failed to deserialize configuration: {}", e))
        })?;

        settings.validate()?;

        debug!(
            environment = %self.environment,
            event_buffer = settings.scheduler.event_buffer,
            input_buffer = settings.scheduler.input_buffer,
            "Loaded configuration"
        );
        Ok(settings)
    }

    fn build_config(&self) -> Result<Config, ConfigError> {
        let builder = Config::builder();

        let builder = match self.config_file {
            Some(ref config_file) => Self::add_file_source(builder, config_file, true)?,
            None => self.add_layered_sources(builder)?,
        };

        // FUSION_JOBS_SCHEDULER__EVENT_BUFFER -> scheduler.event_buffer
        let builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .ignore_empty(true)
                .try_parsing(true),
        );

        builder.build().map_err(ConfigError::from)
    }

    fn add_layered_sources(
        &self,
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        self.environment
            .layers()
            .iter()
            .try_fold(builder, |builder, layer| {
                let required = layer == DEFAULT_LAYER;
                Self::add_file_source(builder, &self.config_dir.join(layer), required)
            })
    }

    fn add_file_source(
        builder: ConfigBuilder<DefaultState>,
        path: &Path,
        required: bool,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        if required && !path.exists() {
            return Err(ConfigError::file_not_found(format!(
                "Required configuration file not found: {}",
                path.display()
            )));
        }

        Ok(builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(required)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::from_dir(DEFAULT_CONFIG_DIR, AppEnvironment::default()))
    }
}
