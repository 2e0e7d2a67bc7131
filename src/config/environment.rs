//! Deployment environment and the config file layers it selects

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;

/// Base layer shared by every environment
pub const DEFAULT_LAYER: &str = "default.toml";

/// Uncommitted per-machine overrides
pub const LOCAL_LAYER: &str = "local.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    /// Never reads `local.toml`
    Test,
    Staging,
    Production,
}

impl Environment {
    /// Variable holding the current environment name
    pub const ENV_VAR: &'static str = "FUSION_JOBS_APP_ENV";

    pub const ALL: [Environment; 4] = [
        Environment::Development,
        Environment::Test,
        Environment::Staging,
        Environment::Production,
    ];

    /// Read the environment from [`Self::ENV_VAR`], falling back to
    /// `Development` when unset or unrecognised.
    pub fn from_env() -> Self {
        std::env::var(Self::ENV_VAR)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        self.names()[0]
    }

    /// Canonical name first, then accepted short forms
    fn names(&self) -> &'static [&'static str] {
        match self {
            Environment::Development => &["development", "dev"],
            Environment::Test => &["test"],
            Environment::Staging => &["staging", "stage"],
            Environment::Production => &["production", "prod"],
        }
    }

    /// File name of this environment's own config layer
    pub fn file_name(&self) -> String {
        format!("{}.toml", self.as_str())
    }

    pub fn reads_local_overrides(&self) -> bool {
        !matches!(self, Environment::Test)
    }

    /// Config files to merge, lowest priority first.
    pub fn layers(&self) -> Vec<String> {
        let mut layers = vec![DEFAULT_LAYER.to_string(), self.file_name()];
        if self.reads_local_overrides() {
            layers.push(LOCAL_LAYER.to_string());
        }
        layers
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|env| env.names().contains(&wanted.as_str()))
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(Environment::as_str).collect();
                ConfigError::EnvVarError(format!(
                    "Invalid environment '{}'. Valid values are: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_and_aliases() {
        let cases = [
            ("development", Environment::Development),
            ("dev", Environment::Development),
            ("test", Environment::Test),
            ("stage", Environment::Staging),
            ("staging", Environment::Staging),
            ("prod", Environment::Production),
            (" Production ", Environment::Production),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<Environment>().unwrap(), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let error = "qa".parse::<Environment>().unwrap_err();
        let message = error.to_string();
        assert!(message.contains("qa"));
        assert!(message.contains("development, test, staging, production"));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for env in Environment::ALL {
            assert_eq!(env.to_string().parse::<Environment>().unwrap(), env);
        }
    }

    #[test]
    fn test_layers() {
        assert_eq!(
            Environment::Staging.layers(),
            vec!["default.toml", "staging.toml", "local.toml"]
        );
        assert_eq!(Environment::Test.layers(), vec!["default.toml", "test.toml"]);
        assert_eq!(Environment::default().file_name(), "development.toml");
    }
}
