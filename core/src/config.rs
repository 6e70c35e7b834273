//! Settings — which backend to run and how to reach the cloud.
//!
//! Loaded from a YAML file (`~/.jobrig/config.yaml` by default, or the
//! path in `JOBRIG_CONFIG`). Every field has a default so a missing or
//! partial file still yields a usable local-backend configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};

/// Which `JobEngine` implementation handles jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: Backend,
    /// Root of the local status store.
    pub jobs_dir: String,
    pub cloud: CloudSettings,
    /// Object-storage prefix under which remote outputs are keyed.
    pub storage_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    pub token: String,
    pub host: String,
    pub region: String,
    /// Image name resolved against the provider's private image list.
    pub image: String,
    /// GPU types acceptable for placement.
    pub gpu_name_set: Vec<String>,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            backend: Backend::Local,
            jobs_dir: default_jobs_dir(),
            cloud: CloudSettings::default(),
            storage_prefix: "cos://jobrig".into(),
        }
    }
}

impl Default for CloudSettings {
    fn default() -> CloudSettings {
        CloudSettings {
            token: String::new(),
            host: "https://api.autodl.com".into(),
            region: "westDC3".into(),
            image: String::new(),
            gpu_name_set: vec!["RTX 4090".into()],
        }
    }
}

fn default_jobs_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    format!("{}/.jobrig/jobs", home)
}

/// `JOBRIG_CONFIG` if set, else `~/.jobrig/config.yaml`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("JOBRIG_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    Path::new(&home).join(".jobrig").join("config.yaml")
}

/// Load settings; a missing file is the defaults, a malformed file is a
/// `Validation` error.
pub fn load(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let text = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&text)
        .map_err(|e| JobError::Validation(format!("bad config {}: {}", path.display(), e)))
}

pub fn save(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_yaml::to_string(settings)
        .map_err(|e| JobError::Validation(format!("cannot serialize config: {}", e)))?;
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_local_backend() {
        let settings = Settings::default();
        assert_eq!(settings.backend, Backend::Local);
        assert!(settings.jobs_dir.ends_with(".jobrig/jobs"));
        assert_eq!(settings.storage_prefix, "cos://jobrig");
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = load(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "backend: remote\ncloud:\n  token: t-123\n").unwrap();
        let settings = load(&path).unwrap();
        assert_eq!(settings.backend, Backend::Remote);
        assert_eq!(settings.cloud.token, "t-123");
        assert_eq!(settings.cloud.region, "westDC3");
        assert_eq!(settings.storage_prefix, "cos://jobrig");
    }

    #[test]
    fn malformed_file_is_a_validation_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "backend: [not a backend\n").unwrap();
        assert!(matches!(load(&path), Err(JobError::Validation(_))));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.yaml");
        let mut settings = Settings::default();
        settings.backend = Backend::Remote;
        settings.cloud.image = "pytorch-2.1".into();
        settings.cloud.gpu_name_set = vec!["A100".into(), "RTX 4090".into()];
        save(&path, &settings).unwrap();
        assert_eq!(load(&path).unwrap(), settings);
    }
}
