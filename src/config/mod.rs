//! Configuration loading and parsing.
//!
//! This module provides YAML-based controller settings and CronJob manifests.

mod error;
mod loader;
mod yaml;

pub use error::ConfigError;
pub use loader::load_cronjobs_from_directory;
pub use yaml::{ApiSettings, BackoffConfig, ControllerConfig, StoreConfig, YamlLoader};
