//! Configuration management for herd

mod run;
pub mod serde_utils;
mod user;

pub use run::{ErrorPolicy, RunConfig, DEFAULT_TIMEOUT};
pub use user::UserEnv;

use crate::error::ConfigError;
use std::io;
use std::path::{Path, PathBuf};

/// Directory holding herd's own configuration (`<config dir>/herd`)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("herd")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Read a TOML file into `T`
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(toml::from_str(&content)?)
}

/// Write `config` as TOML, creating missing parent directories
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, content).map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("herd/config.toml"));
    }

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config::<RunConfig>(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "hosts = [unterminated").unwrap();
        let err = load_config::<RunConfig>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.toml");
        let config = RunConfig {
            hosts: vec!["web-1".into(), "web-2".into()],
            timeout: Duration::from_secs(120),
            ..Default::default()
        };
        save_config(&path, &config).unwrap();
        let loaded: RunConfig = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_into_file_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let err = save_config(&blocker.join("run.toml"), &RunConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Write { .. }));
    }
}
