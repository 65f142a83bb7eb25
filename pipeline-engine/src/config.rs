// Engine Configuration
// Scheduler limits and execution defaults, read from YAML with environment overrides

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_MAX_CONCURRENCY: &str = "PIPELINE_MAX_CONCURRENCY";
pub const ENV_STRICT_CONDITIONS: &str = "PIPELINE_STRICT_CONDITIONS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },
}

/// Engine settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound on units running at once
    pub max_concurrency: usize,
    /// Unresolved references in conditions abort the run
    pub strict_conditions: bool,
    /// How long running units get to stop after cancellation
    pub cancel_grace_period_secs: u64,
    /// Working directory for script steps; defaults to the current directory
    pub working_dir: Option<PathBuf>,
    /// Shell used for script steps
    pub shell: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            strict_conditions: false,
            cancel_grace_period_secs: 10,
            working_dir: None,
            shell: "sh".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load `path`, or the user config file when none is given. A missing
    /// user config file yields the defaults; a missing explicit one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config.normalized())
    }

    /// `~/.config/pipeline/config.yaml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pipeline").join("config.yaml"))
    }

    /// Apply environment overrides through `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_CONCURRENCY) {
            self.max_concurrency = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: ENV_MAX_CONCURRENCY.to_string(),
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup(ENV_STRICT_CONDITIONS) {
            self.strict_conditions = match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: ENV_STRICT_CONDITIONS.to_string(),
                        value,
                    })
                }
            };
        }

        Ok(self.normalized())
    }

    pub fn cancel_grace_period(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_period_secs)
    }

    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn normalized(mut self) -> Self {
        self.max_concurrency = self.max_concurrency.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_yaml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.cancel_grace_period(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_yaml() {
        let config = EngineConfig::from_yaml("maxConcurrency: 0\nstrictConditions: true\nshell: bash\n").unwrap();
        assert_eq!(config.max_concurrency, 1);
        assert!(config.strict_conditions);
        assert_eq!(config.shell, "bash");
        assert_eq!(config.cancel_grace_period_secs, 10);
    }

    #[test]
    fn test_unknown_field_is_ignored() {
        assert!(EngineConfig::from_yaml("colour: blue\n").is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [(ENV_MAX_CONCURRENCY, "8"), (ENV_STRICT_CONDITIONS, "yes")]
            .into_iter()
            .collect();
        let config = EngineConfig::default()
            .with_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert!(config.strict_conditions);

        let err = EngineConfig::default()
            .with_overrides(|name| (name == ENV_MAX_CONCURRENCY).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "maxConcurrency: 2\n").unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap().max_concurrency, 2);

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            EngineConfig::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
