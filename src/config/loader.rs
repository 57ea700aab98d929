//! Manifest directory loading.

use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::yaml::YamlLoader;
use crate::core::cronjob::CronJob;
use crate::core::types::ObjectKey;

/// Load all CronJob declarations from `.yaml`/`.yml` files in a directory.
///
/// Files are read in name order. A key declared twice is an error.
pub fn load_cronjobs_from_directory(dir: impl AsRef<Path>) -> Result<Vec<CronJob>, ConfigError> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let dir_error = |source| ConfigError::DirReadError {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(dir_error)? {
        let path = entry.map_err(dir_error)?.path();

        // Only process .yaml and .yml files
        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut cronjobs: Vec<CronJob> = Vec::new();
    let mut seen: Vec<(ObjectKey, PathBuf)> = Vec::new();
    for path in paths {
        for cronjob in YamlLoader::load_manifests(&path)? {
            let key = cronjob.key();
            if let Some((_, first)) = seen.iter().find(|(k, _)| *k == key) {
                return Err(ConfigError::InvalidManifest {
                    path,
                    reason: format!("{} already declared in '{}'", key, first.display()),
                });
            }
            seen.push((key, path.clone()));
            cronjobs.push(cronjob);
        }
    }

    Ok(cronjobs)
}
