//! YAML configuration parsing.
//!
//! Parses the controller configuration file and CronJob manifests.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;
use crate::controller::BackoffPolicy;
use crate::core::cronjob::{CronJob, KIND};

/// Controller configuration (cronlet.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Store configuration.
    pub store: StoreConfig,
    /// Maximum concurrent reconcile passes.
    pub workers: usize,
    /// Upper bound on one reconcile pass, in seconds.
    pub pass_timeout_secs: u64,
    /// How long shutdown waits for in-flight passes, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Retry backoff for failing passes.
    pub backoff: BackoffConfig,
    /// HTTP API settings.
    pub api: ApiSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            workers: 4,
            pass_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            backoff: BackoffConfig::default(),
            api: ApiSettings::default(),
        }
    }
}

impl ControllerConfig {
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff.base_ms),
            Duration::from_secs(self.backoff.max_secs),
        )
    }
}

/// Store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// In-memory store (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite store.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure, in milliseconds.
    pub base_ms: u64,
    /// Cap on any delay, in seconds.
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 5,
            max_secs: 1000,
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load controller configuration from a file.
    pub fn load_controller_config(path: impl AsRef<Path>) -> Result<ControllerConfig, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        let config: ControllerConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_controller_config(&config)?;
        Ok(config)
    }

    /// Parse controller configuration from a YAML string.
    pub fn parse_controller_config(yaml: &str) -> Result<ControllerConfig, ConfigError> {
        let config: ControllerConfig = serde_yaml::from_str(yaml)?;
        Self::validate_controller_config(&config)?;
        Ok(config)
    }

    fn validate_controller_config(config: &ControllerConfig) -> Result<(), ConfigError> {
        if config.workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "workers must be at least 1".into(),
            ));
        }
        if config.pass_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "pass_timeout_secs must be at least 1".into(),
            ));
        }
        if let StoreConfig::Sqlite { path } = &config.store
            && path.is_empty()
        {
            return Err(ConfigError::InvalidConfig(
                "sqlite store requires a path".into(),
            ));
        }
        Ok(())
    }

    /// Load every CronJob declared in a manifest file.
    pub fn load_manifests(path: impl AsRef<Path>) -> Result<Vec<CronJob>, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        parse_manifests_from(&content, path)
    }

    /// Parse CronJob declarations from a (possibly multi-document) YAML string.
    pub fn parse_manifests(yaml: &str) -> Result<Vec<CronJob>, ConfigError> {
        parse_manifests_from(yaml, Path::new("<inline>"))
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_manifests_from(yaml: &str, path: &Path) -> Result<Vec<CronJob>, ConfigError> {
    let yaml_error = |source| ConfigError::YamlFileError {
        path: path.to_path_buf(),
        source,
    };
    let mut cronjobs = Vec::new();

    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(document).map_err(yaml_error)?;
        if value.is_null() {
            continue;
        }

        if let Some(kind) = value.get("kind").and_then(|k| k.as_str())
            && kind != KIND
        {
            return Err(ConfigError::InvalidManifest {
                path: path.to_path_buf(),
                reason: format!("expected kind {}, found {}", KIND, kind),
            });
        }

        let cronjob: CronJob = serde_yaml::from_value(value).map_err(yaml_error)?;
        validate_cronjob(&cronjob, path)?;
        cronjobs.push(cronjob);
    }

    Ok(cronjobs)
}

fn validate_cronjob(cronjob: &CronJob, path: &Path) -> Result<(), ConfigError> {
    if cronjob.metadata.name.is_empty() {
        return Err(ConfigError::InvalidManifest {
            path: path.to_path_buf(),
            reason: "metadata.name is empty".into(),
        });
    }

    cronjob
        .schedule()
        .map_err(|source| ConfigError::InvalidSchedule {
            path: path.to_path_buf(),
            name: cronjob.metadata.name.clone(),
            source,
        })?;
    Ok(())
}
